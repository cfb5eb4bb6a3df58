//! Data structures for the food diary ledger.

use crate::error::{FitError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

/// Canonical logical-date format used for every ledger key.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Check that `date` is a real calendar day written as `YYYY-MM-DD`.
///
/// Only the canonical spelling is accepted so that string equality and
/// date equality coincide.
pub fn validate_date(date: &str) -> Result<NaiveDate> {
    let parsed = NaiveDate::parse_from_str(date, DATE_FORMAT)
        .map_err(|e| FitError::validation_error(format!("Invalid date {:?}: {}", date, e)))?;
    if parsed.format(DATE_FORMAT).to_string() != date {
        return Err(FitError::validation_error(format!(
            "Date {:?} is not in YYYY-MM-DD form",
            date
        )));
    }
    Ok(parsed)
}

/// Today's logical date in local time.
pub fn today() -> String {
    chrono::Local::now().date_naive().format(DATE_FORMAT).to_string()
}

/// Opaque per-user partition key. Ledger reads and writes never cross scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserScope(String);

impl UserScope {
    /// Create a scope from the user identifier carried by the auth credential.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(FitError::scope_error("user identifier is empty"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-name-safe key for this scope.
    ///
    /// ASCII letters, digits and `-` are kept; every other byte becomes
    /// `_xx` (lowercase hex). The mapping is injective, so two scopes never
    /// share storage.
    pub fn storage_key(&self) -> String {
        let mut key = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                key.push(byte as char);
            } else {
                key.push_str(&format!("_{:02x}", byte));
            }
        }
        key
    }
}

impl fmt::Display for UserScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which meal an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealCategory {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl fmt::Display for MealCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Snack => "snack",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for MealCategory {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "breakfast" => Ok(Self::Breakfast),
            "lunch" => Ok(Self::Lunch),
            "dinner" => Ok(Self::Dinner),
            "snack" => Ok(Self::Snack),
            other => Err(FitError::validation_error(format!("Unknown meal category: {}", other))),
        }
    }
}

/// Where an entry's nutrition data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Picked from the food catalog
    Catalog,
    /// Typed in by the user
    Custom,
}

/// Calories and macronutrients. All quantities are grams except calories (kcal).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Nutrients {
    pub calories: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbohydrates: f64,
}

impl Nutrients {
    pub fn new(calories: f64, protein: f64, fat: f64, carbohydrates: f64) -> Self {
        Self {
            calories,
            protein,
            fat,
            carbohydrates,
        }
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("calories", self.calories),
            ("protein", self.protein),
            ("fat", self.fat),
            ("carbohydrates", self.carbohydrates),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FitError::validation_error(format!(
                    "{} must be a non-negative number, got {}",
                    field, value
                )));
            }
        }
        Ok(())
    }
}

impl Add for Nutrients {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            calories: self.calories + other.calories,
            protein: self.protein + other.protein,
            fat: self.fat + other.fat,
            carbohydrates: self.carbohydrates + other.carbohydrates,
        }
    }
}

impl AddAssign for Nutrients {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

/// One logged food item. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    date: String,
    name: String,
    #[serde(flatten)]
    nutrients: Nutrients,
    category: MealCategory,
    provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    catalog_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    grams: Option<f64>,
}

impl LedgerEntry {
    /// Start building an entry for `date` (`YYYY-MM-DD`).
    pub fn builder(date: impl Into<String>, name: impl Into<String>) -> LedgerEntryBuilder {
        LedgerEntryBuilder {
            date: date.into(),
            name: name.into(),
            nutrients: Nutrients::default(),
            category: MealCategory::Snack,
            catalog_id: None,
            grams: None,
        }
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nutrients(&self) -> Nutrients {
        self.nutrients
    }

    pub fn category(&self) -> MealCategory {
        self.category
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn catalog_id(&self) -> Option<&str> {
        self.catalog_id.as_deref()
    }

    /// Portion weight in grams, when known.
    pub fn grams(&self) -> Option<f64> {
        self.grams
    }
}

/// Validating builder for [`LedgerEntry`].
#[derive(Debug, Clone)]
pub struct LedgerEntryBuilder {
    date: String,
    name: String,
    nutrients: Nutrients,
    category: MealCategory,
    catalog_id: Option<String>,
    grams: Option<f64>,
}

impl LedgerEntryBuilder {
    pub fn calories(mut self, calories: f64) -> Self {
        self.nutrients.calories = calories;
        self
    }

    pub fn protein(mut self, protein: f64) -> Self {
        self.nutrients.protein = protein;
        self
    }

    pub fn fat(mut self, fat: f64) -> Self {
        self.nutrients.fat = fat;
        self
    }

    pub fn carbohydrates(mut self, carbohydrates: f64) -> Self {
        self.nutrients.carbohydrates = carbohydrates;
        self
    }

    pub fn nutrients(mut self, nutrients: Nutrients) -> Self {
        self.nutrients = nutrients;
        self
    }

    pub fn category(mut self, category: MealCategory) -> Self {
        self.category = category;
        self
    }

    /// Mark the entry as catalog-sourced with the given catalog id.
    /// Entries without one are user-authored.
    pub fn catalog_id(mut self, id: impl Into<String>) -> Self {
        self.catalog_id = Some(id.into());
        self
    }

    pub fn grams(mut self, grams: f64) -> Self {
        self.grams = Some(grams);
        self
    }

    pub fn build(self) -> Result<LedgerEntry> {
        validate_date(&self.date)?;
        if self.name.trim().is_empty() {
            return Err(FitError::validation_error("entry name is empty"));
        }
        self.nutrients.validate()?;
        if let Some(grams) = self.grams {
            if !grams.is_finite() || grams < 0.0 {
                return Err(FitError::validation_error(format!(
                    "grams must be a non-negative number, got {}",
                    grams
                )));
            }
        }

        let provenance = if self.catalog_id.is_some() {
            Provenance::Catalog
        } else {
            Provenance::Custom
        };

        Ok(LedgerEntry {
            date: self.date,
            name: self.name,
            nutrients: self.nutrients,
            category: self.category,
            provenance,
            catalog_id: self.catalog_id,
            grams: self.grams,
        })
    }
}

/// Per-day totals derived from the ledger. Never a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: String,
    #[serde(flatten)]
    pub totals: Nutrients,
    /// Number of entries summed into `totals`
    #[serde(default)]
    pub entry_count: usize,
}

impl DailyAggregate {
    /// All-zero aggregate for a date with no entries.
    pub fn empty(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            totals: Nutrients::default(),
            entry_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }
}
