use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SYSTEM_OWNER: &str = "system";
pub const DEFAULT_PROFILE_NAME: &str = "My Profile";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Top,
    Bottom,
    Shoes,
    Accessory,
    Outerwear,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Top,
        Category::Bottom,
        Category::Shoes,
        Category::Accessory,
        Category::Outerwear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Top => "top",
            Category::Bottom => "bottom",
            Category::Shoes => "shoes",
            Category::Accessory => "accessory",
            Category::Outerwear => "outerwear",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| {
                format!("unknown category '{raw}' (expected top, bottom, shoes, accessory or outerwear)")
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClothingItem {
    pub id: String,
    pub owner_id: String,
    pub image_url: String,
    pub category: Category,
    pub sub_category: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClothingItem {
    pub image_url: String,
    pub category: Category,
    #[serde(default)]
    pub sub_category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyProfile {
    pub id: String,
    pub owner_id: String,
    pub image_url: String,
    pub name: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// The two synthetic profiles every user can try outfits on.
///
/// They are never stored; readers append them after the user's own rows.
pub fn default_mannequins() -> Vec<BodyProfile> {
    [
        ("mannequin-male", "/mannequin-male.png", "Male Mannequin"),
        ("mannequin-female", "/mannequin-female.png", "Female Mannequin"),
    ]
    .into_iter()
    .map(|(id, image_url, name)| BodyProfile {
        id: id.to_string(),
        owner_id: SYSTEM_OWNER.to_string(),
        image_url: image_url.to_string(),
        name: name.to_string(),
        is_default: true,
        created_at: DateTime::<Utc>::default(),
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outfit {
    pub id: String,
    pub owner_id: String,
    pub occasion: String,
    pub generated_image_url: String,
    pub items_used: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOutfit {
    pub occasion: String,
    pub generated_image_url: String,
    pub items_used: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Outerwear".parse::<Category>(), Ok(Category::Outerwear));
        assert_eq!(" shoes ".parse::<Category>(), Ok(Category::Shoes));
        assert!("hat".parse::<Category>().is_err());
    }

    #[test]
    fn mannequins_are_stable_between_calls() {
        let first = default_mannequins();
        let second = default_mannequins();
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["mannequin-male", "mannequin-female"]
        );
        assert!(first.iter().all(|p| p.is_default && p.owner_id == SYSTEM_OWNER));
    }

    #[test]
    fn clothing_item_serializes_camel_case() -> anyhow::Result<()> {
        let item = ClothingItem {
            id: "a".to_string(),
            owner_id: "user_1".to_string(),
            image_url: "https://utfs.io/f/a.png".to_string(),
            category: Category::Top,
            sub_category: Some("t-shirt".to_string()),
            description: None,
            created_at: DateTime::<Utc>::default(),
        };
        let value = serde_json::to_value(&item)?;
        assert_eq!(value["ownerId"], "user_1");
        assert_eq!(value["category"], "top");
        assert_eq!(value["subCategory"], "t-shirt");
        Ok(())
    }
}
