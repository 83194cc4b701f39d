//! Harvested data domains and their storage naming.

use serde::{Deserialize, Serialize};

/// A family of harvested records flowing through the zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Books,
    Quotes,
    Commerce,
    Partners,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::Books,
        Domain::Quotes,
        Domain::Commerce,
        Domain::Partners,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Books => "books",
            Self::Quotes => "quotes",
            Self::Commerce => "commerce",
            Self::Partners => "partners",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "books" => Some(Self::Books),
            "quotes" => Some(Self::Quotes),
            "commerce" | "ecommerce" | "products" => Some(Self::Commerce),
            "partners" | "librairies" => Some(Self::Partners),
            _ => None,
        }
    }

    /// Folder holding this domain's objects in every zone.
    pub fn folder(&self) -> &'static str {
        self.as_str()
    }

    /// Key prefix (with trailing slash) used for zone listings.
    pub fn zone_prefix(&self) -> String {
        format!("{}/", self.folder())
    }

    /// File-name prefix producers use for raw objects.
    pub fn raw_file_prefix(&self) -> &'static str {
        match self {
            Self::Books => "books",
            Self::Quotes => "quotes",
            Self::Commerce => "ecommerce",
            Self::Partners => "librairies",
        }
    }

    /// Reference data lands in a `dim_` table, everything else in `fact_`.
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Partners)
    }

    /// Warehouse table this domain is loaded into.
    pub fn table_name(&self) -> String {
        if self.is_reference() {
            format!("dim_{}", self.as_str())
        } else {
            format!("fact_{}", self.as_str())
        }
    }

    /// Columns whose combined value identifies a row within one batch.
    pub fn natural_key(&self) -> &'static [&'static str] {
        match self {
            Self::Books => &["title"],
            Self::Quotes => &["text", "author"],
            Self::Commerce => &["sku"],
            Self::Partners => &["adresse", "code_postal", "ville"],
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::from_str(s).ok_or_else(|| format!("unknown domain '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert_eq!(Domain::Books.table_name(), "fact_books");
        assert_eq!(Domain::Quotes.table_name(), "fact_quotes");
        assert_eq!(Domain::Commerce.table_name(), "fact_commerce");
        assert_eq!(Domain::Partners.table_name(), "dim_partners");
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!(Domain::from_str("ecommerce"), Some(Domain::Commerce));
        assert_eq!(Domain::from_str(" Books "), Some(Domain::Books));
        assert_eq!(Domain::from_str("librairies"), Some(Domain::Partners));
        assert_eq!(Domain::from_str("films"), None);
    }

    #[test]
    fn test_zone_prefix_has_trailing_slash() {
        for domain in Domain::ALL {
            assert!(domain.zone_prefix().ends_with('/'));
        }
    }
}
