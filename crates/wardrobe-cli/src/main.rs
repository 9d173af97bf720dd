use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use wardrobe_contracts::accounts::Role;
use wardrobe_contracts::closet::{Category, NewClothingItem, NewOutfit};
use wardrobe_contracts::tiers::SubscriptionTier;
use wardrobe_engine::errors::QUOTA_EXCEEDED_MESSAGE;
use wardrobe_engine::normalizer::GENERAL_MAX_DIM;
use wardrobe_engine::{EngineConfig, Identity, Stylist, TryOnItem, TryOnResult};

#[derive(Debug, Parser)]
#[command(name = "wardrobe-rs", version, about = "Wardrobe outfit generator")]
struct Cli {
    /// Holds wardrobe.json and events.jsonl.
    #[arg(long, global = true, default_value = ".wardrobe")]
    data_dir: PathBuf,
    /// Identity-provider user id; omit to act unauthenticated.
    #[arg(long, global = true)]
    user: Option<String>,
    #[arg(long, global = true, default_value = "")]
    email: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    AddItem(AddItemArgs),
    Items,
    DeleteItem(IdArgs),
    AddProfile(AddProfileArgs),
    Profiles,
    DeleteProfile(IdArgs),
    Select(SelectArgs),
    TryOn(TryOnArgs),
    Generate(GenerateArgs),
    Outfits,
    DeleteOutfit(IdArgs),
    Usage,
    History,
    Normalize(NormalizeArgs),
    #[command(subcommand)]
    Admin(AdminCommand),
}

#[derive(Debug, Subcommand)]
enum AdminCommand {
    Users,
    SetRole(SetRoleArgs),
    SetTier(SetTierArgs),
    Bootstrap,
}

#[derive(Debug, Parser)]
struct AddItemArgs {
    /// Repeat to add several items of the same category at once.
    #[arg(long = "image-url", required = true)]
    image_urls: Vec<String>,
    #[arg(long)]
    category: Category,
    #[arg(long)]
    sub_category: Option<String>,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Parser)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Parser)]
struct AddProfileArgs {
    #[arg(long)]
    image_url: String,
    #[arg(long)]
    name: Option<String>,
}

#[derive(Debug, Parser)]
struct SelectArgs {
    #[arg(long)]
    occasion: String,
}

#[derive(Debug, Parser)]
struct TryOnArgs {
    #[arg(long)]
    body: String,
    /// Closet item id; repeat for each item.
    #[arg(long = "item", required = true)]
    items: Vec<String>,
    /// Saves the result as an outfit for this occasion when set; saving
    /// counts against the monthly quota.
    #[arg(long)]
    occasion: Option<String>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    occasion: String,
    /// Body image to render on; repeat to try the same selection on several.
    #[arg(long = "body", required = true)]
    bodies: Vec<String>,
}

#[derive(Debug, Parser)]
struct NormalizeArgs {
    reference: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value_t = GENERAL_MAX_DIM)]
    max_dim: u32,
}

#[derive(Debug, Parser)]
struct SetRoleArgs {
    user_id: String,
    role: Role,
}

#[derive(Debug, Parser)]
struct SetTierArgs {
    user_id: String,
    tier: SubscriptionTier,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("wardrobe-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    let stylist = Stylist::open(&config, &cli.data_dir)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_command(&stylist, cli, &mut out)
}

/// Exit code 2 marks a try-on that finished without an image.
fn run_command(stylist: &Stylist, cli: Cli, out: &mut impl Write) -> Result<i32> {
    let identity = Identity::user(cli.user.unwrap_or_default(), cli.email);
    match cli.command {
        Command::AddItem(args) => {
            let items = args
                .image_urls
                .into_iter()
                .map(|image_url| NewClothingItem {
                    image_url,
                    category: args.category,
                    sub_category: args.sub_category.clone(),
                    description: args.description.clone(),
                })
                .collect();
            print_json(out, &stylist.closet.save_clothing_items(&identity, items)?)?;
        }
        Command::Items => print_json(out, &stylist.closet.get_clothing_items(&identity)?)?,
        Command::DeleteItem(args) => print_json(
            out,
            &json!({ "deleted": stylist.closet.delete_clothing_item(&identity, &args.id)? }),
        )?,
        Command::AddProfile(args) => print_json(
            out,
            &stylist
                .closet
                .save_body_profile(&identity, &args.image_url, args.name.as_deref())?,
        )?,
        Command::Profiles => print_json(out, &stylist.closet.get_body_profiles(&identity)?)?,
        Command::DeleteProfile(args) => print_json(
            out,
            &json!({ "deleted": stylist.closet.delete_body_profile(&identity, &args.id)? }),
        )?,
        Command::Select(args) => print_json(
            out,
            &stylist.selector.generate_outfit(&identity, &args.occasion)?,
        )?,
        Command::TryOn(args) => return run_try_on(stylist, &identity, args, out),
        Command::Generate(args) => return run_generate(stylist, identity, args, out),
        Command::Outfits => print_json(out, &stylist.persister.list_outfits(&identity)?)?,
        Command::DeleteOutfit(args) => print_json(
            out,
            &json!({ "deleted": stylist.persister.delete_outfit(&identity, &args.id)? }),
        )?,
        Command::Usage => print_json(out, &stylist.gate.subscription_info(&identity)?)?,
        Command::History => print_json(out, &stylist.gate.usage_history(&identity)?)?,
        Command::Normalize(args) => {
            let image = stylist.normalizer.normalize(&args.reference, args.max_dim)?;
            let bytes = image
                .decode_bytes()
                .context("normalized image was not valid base64")?;
            if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&args.out, &bytes)
                .with_context(|| format!("failed to write {}", args.out.display()))?;
            print_json(
                out,
                &json!({
                    "path": args.out.display().to_string(),
                    "width": image.width,
                    "height": image.height,
                    "bytes": bytes.len(),
                }),
            )?;
        }
        Command::Admin(command) => run_admin(stylist, &identity, command, out)?,
    }
    Ok(0)
}

fn run_admin(
    stylist: &Stylist,
    identity: &Identity,
    command: AdminCommand,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        AdminCommand::Users => print_json(out, &stylist.admin.get_all_users(identity)?),
        AdminCommand::SetRole(args) => print_json(
            out,
            &stylist
                .admin
                .update_user_role(identity, &args.user_id, args.role)?,
        ),
        AdminCommand::SetTier(args) => print_json(
            out,
            &stylist
                .admin
                .update_user_tier(identity, &args.user_id, args.tier)?,
        ),
        AdminCommand::Bootstrap => {
            stylist.gate.account(identity)?;
            print_json(out, &stylist.admin.make_current_user_admin(identity)?)
        }
    }
}

fn run_try_on(
    stylist: &Stylist,
    identity: &Identity,
    args: TryOnArgs,
    out: &mut impl Write,
) -> Result<i32> {
    if args.occasion.is_some() && !stylist.gate.check_generation_limit(identity)?.allowed {
        bail!("{}", QUOTA_EXCEEDED_MESSAGE);
    }
    let closet = stylist.closet.get_clothing_items(identity)?;
    let mut items = Vec::with_capacity(args.items.len());
    for id in &args.items {
        let Some(item) = closet.iter().find(|item| &item.id == id) else {
            bail!("item {id} is not in your closet");
        };
        items.push(TryOnItem {
            id: item.id.clone(),
            image_url: item.image_url.clone(),
        });
    }

    let result = stylist.renderer.generate_try_on(&items, &args.body);
    report_warnings(&result);
    let outfit = match (args.occasion, result.generated_image_url.clone()) {
        (Some(occasion), Some(generated_image_url)) => Some(stylist.persister.save_outfit(
            identity,
            NewOutfit {
                occasion,
                generated_image_url,
                items_used: args.items,
            },
        )?),
        _ => None,
    };
    print_json(out, &json!({ "tryOn": result, "outfit": outfit }))?;
    Ok(if result.succeeded() { 0 } else { 2 })
}

fn run_generate(
    stylist: &Stylist,
    identity: Identity,
    args: GenerateArgs,
    out: &mut impl Write,
) -> Result<i32> {
    let mut session = stylist.session(identity);
    let selection = session.select(&args.occasion)?.clone();
    let mut outcomes = Vec::with_capacity(args.bodies.len());
    for body in &args.bodies {
        let outcome = session.try_on(body)?;
        report_warnings(&outcome.try_on);
        outcomes.push(outcome);
    }
    let succeeded = outcomes.iter().any(|outcome| outcome.try_on.succeeded());
    print_json(
        out,
        &json!({
            "selection": selection,
            "tryOns": outcomes,
            "stage": session.stage(),
        }),
    )?;
    Ok(if succeeded { 0 } else { 2 })
}

fn report_warnings(result: &TryOnResult) {
    for warning in &result.warnings {
        eprintln!("wardrobe-rs warning: {warning}");
    }
    if let Some(error) = result.generation_error.as_deref() {
        eprintln!("wardrobe-rs warning: {error}");
    }
}

fn print_json(out: &mut impl Write, value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    writeln!(out, "{text}")?;
    Ok(())
}
