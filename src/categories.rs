use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionCategory {
    Shopping,
    Food,
    Transportation,
    Bills,
    Entertainment,
    Health,
    Education,
    Income,
    Other,
}

impl TransactionCategory {
    pub const ALL: [TransactionCategory; 9] = [
        TransactionCategory::Shopping,
        TransactionCategory::Food,
        TransactionCategory::Transportation,
        TransactionCategory::Bills,
        TransactionCategory::Entertainment,
        TransactionCategory::Health,
        TransactionCategory::Education,
        TransactionCategory::Income,
        TransactionCategory::Other,
    ];

    /// Stable code stored in the database.
    pub fn code(self) -> &'static str {
        match self {
            Self::Shopping => "shopping",
            Self::Food => "food",
            Self::Transportation => "transportation",
            Self::Bills => "bills",
            Self::Entertainment => "entertainment",
            Self::Health => "health",
            Self::Education => "education",
            Self::Income => "income",
            Self::Other => "other",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Shopping => "Alışveriş",
            Self::Food => "Yemek",
            Self::Transportation => "Ulaşım",
            Self::Bills => "Faturalar",
            Self::Entertainment => "Eğlence",
            Self::Health => "Sağlık",
            Self::Education => "Eğitim",
            Self::Income => "Gelir",
            Self::Other => "Diğer",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::Shopping => "#4ECDC4",
            Self::Food => "#FF6B6B",
            Self::Transportation => "#45B7D1",
            Self::Bills => "#96CEB4",
            Self::Entertainment => "#FFBE0B",
            Self::Health => "#FF006E",
            Self::Education => "#8338EC",
            Self::Income => "#06D6A0",
            Self::Other => "#A0A0A0",
        }
    }

    /// Accepts a code or a display name, case-insensitively.
    pub fn parse(text: &str) -> Option<Self> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|c| {
            c.code() == needle || c.display_name().to_lowercase() == needle
        })
    }

    /// Keyword heuristic; the first matching category in declaration order wins.
    pub fn from_description(description: &str) -> Self {
        keyword_patterns()
            .iter()
            .find(|(_, re)| re.is_match(description))
            .map(|(category, _)| *category)
            .unwrap_or(Self::Other)
    }
}

impl fmt::Display for TransactionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

fn keyword_patterns() -> &'static [(TransactionCategory, Regex)] {
    static PATTERNS: OnceLock<Vec<(TransactionCategory, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (TransactionCategory::Shopping, "market|alisveris|mağaza"),
            (TransactionCategory::Food, "yemek|cafe|restaurant|restoran"),
            (TransactionCategory::Transportation, "taksi|metro|otobus|otobüs|uber"),
            (
                TransactionCategory::Bills,
                "fatura|elektrik|su|dogalgaz|doğalgaz|internet",
            ),
            (TransactionCategory::Entertainment, "sinema|tiyatro|konser"),
            (TransactionCategory::Health, "hastane|eczane|doktor"),
            (TransactionCategory::Education, "kurs|kitap|okul"),
            (TransactionCategory::Income, "maaş|gelir|kira geliri"),
        ]
        .into_iter()
        .map(|(category, pattern)| {
            let re = Regex::new(&format!("(?i){pattern}")).expect("category keyword regex");
            (category, re)
        })
        .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_heuristic_follows_declaration_order() {
        assert_eq!(
            TransactionCategory::from_description("MIGROS MARKET ISTANBUL"),
            TransactionCategory::Shopping
        );
        assert_eq!(
            TransactionCategory::from_description("Starbucks Cafe"),
            TransactionCategory::Food
        );
        assert_eq!(
            TransactionCategory::from_description("Elektrik faturası"),
            TransactionCategory::Bills
        );
        assert_eq!(
            TransactionCategory::from_description("Maaş ödemesi"),
            TransactionCategory::Income
        );
        // "market" wins over "yemek" because shopping is checked first.
        assert_eq!(
            TransactionCategory::from_description("yemek market"),
            TransactionCategory::Shopping
        );
        assert_eq!(
            TransactionCategory::from_description("ATM PARA CEKME"),
            TransactionCategory::Other
        );
    }

    #[test]
    fn parse_accepts_codes_and_display_names() {
        assert_eq!(TransactionCategory::parse("FOOD"), Some(TransactionCategory::Food));
        assert_eq!(TransactionCategory::parse("Ulaşım"), Some(TransactionCategory::Transportation));
        assert_eq!(TransactionCategory::parse("diğer"), Some(TransactionCategory::Other));
        assert_eq!(TransactionCategory::parse("unknown"), None);
        assert_eq!(TransactionCategory::Health.to_string(), "Sağlık");
    }
}
