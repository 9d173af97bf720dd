use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use wardrobe_contracts::closet::ClothingItem;
use wardrobe_contracts::events::EventLog;
use wardrobe_contracts::store::WardrobeStore;

use crate::errors::SelectionError;
use crate::identity::Identity;
use crate::map_object;
use crate::upstream::TextModel;
use crate::usage::UsageGate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutfitSelection {
    pub selected_item_ids: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResult {
    pub selection: OutfitSelection,
    /// Selected closet rows, in closet order.
    pub closet_items: Vec<ClothingItem>,
}

/// Asks the text model to pick an outfit for an occasion from the caller's
/// closet. One model call, no retries.
#[derive(Clone)]
pub struct OutfitSelector {
    store: Arc<WardrobeStore>,
    gate: UsageGate,
    model: Arc<dyn TextModel>,
    events: EventLog,
}

impl OutfitSelector {
    pub fn new(
        store: Arc<WardrobeStore>,
        gate: UsageGate,
        model: Arc<dyn TextModel>,
        events: EventLog,
    ) -> Self {
        Self {
            store,
            gate,
            model,
            events,
        }
    }

    pub fn generate_outfit(
        &self,
        identity: &Identity,
        occasion: &str,
    ) -> Result<SelectionResult, SelectionError> {
        let owner_id = identity.external_id()?;
        if !self.gate.check_generation_limit(identity)?.allowed {
            return Err(SelectionError::QuotaExceeded);
        }

        let closet = self.store.list_clothing_items(owner_id)?;
        if closet.is_empty() {
            return Err(SelectionError::EmptyCloset);
        }

        let mut shuffled = closet.clone();
        shuffled.shuffle(&mut rand::thread_rng());
        let prompt = build_selection_prompt(occasion, &shuffled);

        let text = self.model.generate_text(&prompt)?;
        let parsed = parse_selection(&text)?;
        let requested = parsed.selected_item_ids.len();
        let result = restrict_to_closet(parsed, &closet);

        let events = self.events.for_actor(identity.actor());
        if result.selection.selected_item_ids.len() < requested {
            events.note(
                "selection_dropped_ids",
                map_object(json!({
                    "model": self.model.name(),
                    "kept": result.selection.selected_item_ids,
                })),
            );
        }
        events.note(
            "outfit_selected",
            map_object(json!({
                "model": self.model.name(),
                "occasion": occasion,
                "closet_size": closet.len(),
                "selected": result.selection.selected_item_ids.len(),
            })),
        );
        Ok(result)
    }
}

pub fn build_selection_prompt(occasion: &str, items: &[ClothingItem]) -> String {
    let inventory = items
        .iter()
        .map(|item| {
            json!({
                "id": item.id,
                "category": item.category,
                "subCategory": item.sub_category,
                "description": item.description,
            })
        })
        .collect::<Vec<Value>>();
    let inventory_json = serde_json::to_string(&inventory).unwrap_or_else(|_| "[]".to_string());

    format!(
        "You are a creative personal stylist.\n\
Your goal is to create the best outfit for the occasion.\n\
Occasion: \"{occasion}\"\n\
\n\
Available Closet Items (JSON):\n\
{inventory_json}\n\
\n\
STRICT RULE: You must ONLY select items from the \"Available Closet Items\" list above, using their exact ids. Do NOT invent or suggest any items that are not in this list.\n\
Select the best outfit for this occasion using the available items. Be creative: don't just pick the most obvious items.\n\
DO NOT ADD WATCHES, JEWELRY OR ANY ACCESSORIES UNLESS THEY ARE IN THE \"Available Closet Items\" list.\n\
Return ONLY a JSON object with the following structure:\n\
{{\n  \"selectedItemIds\": [\"id1\", \"id2\"],\n  \"reasoning\": \"Why this outfit works...\"\n}}"
    )
}

/// Removes every Markdown code fence marker (with or without a `json` tag).
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .trim()
        .to_string()
}

pub fn parse_selection(text: &str) -> Result<OutfitSelection, SelectionError> {
    let cleaned = strip_code_fences(text);
    serde_json::from_str::<OutfitSelection>(&cleaned).map_err(|source| SelectionError::Parse {
        raw: text.to_string(),
        source,
    })
}

/// Drops ids that are not in `closet` (and repeats), then collects the
/// matching rows in closet order.
pub fn restrict_to_closet(selection: OutfitSelection, closet: &[ClothingItem]) -> SelectionResult {
    let closet_ids = closet
        .iter()
        .map(|item| item.id.as_str())
        .collect::<HashSet<_>>();
    let mut seen = HashSet::new();
    let selected_item_ids = selection
        .selected_item_ids
        .into_iter()
        .filter(|id| closet_ids.contains(id.as_str()) && seen.insert(id.clone()))
        .collect::<Vec<_>>();
    let closet_items = closet
        .iter()
        .filter(|item| seen.contains(&item.id))
        .cloned()
        .collect();

    SelectionResult {
        selection: OutfitSelection {
            selected_item_ids,
            reasoning: selection.reasoning,
        },
        closet_items,
    }
}
