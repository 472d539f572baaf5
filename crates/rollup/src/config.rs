use serde::Deserialize;

use crate::error::RollupError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Run configuration: how exports are read and how diagnostics are reported.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RollupConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    #[serde(default)]
    pub delimiter: Delimiter,
    #[serde(default = "default_quote")]
    pub quote: char,
    /// Backslash-style escape inside quoted fields. Doubled quotes are always accepted.
    #[serde(default)]
    pub escape: Option<char>,
    #[serde(default = "default_true")]
    pub trim: bool,
    #[serde(default)]
    pub columns: ColumnMapping,
    #[serde(default)]
    pub filter: Option<RowFilter>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            delimiter: Delimiter::default(),
            quote: default_quote(),
            escape: None,
            trim: true,
            columns: ColumnMapping::default(),
            filter: None,
        }
    }
}

fn default_quote() -> char {
    '"'
}

fn default_true() -> bool {
    true
}

/// Field delimiter. `"auto"` sniffs among tab, `;`, `,` and `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Delimiter {
    Auto,
    Byte(u8),
}

impl Default for Delimiter {
    fn default() -> Self {
        Self::Byte(b',')
    }
}

impl TryFrom<String> for Delimiter {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "auto" => Ok(Self::Auto),
            "tab" | "\t" => Ok(Self::Byte(b'\t')),
            s => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii() && c != '\n' && c != '\r' => {
                        Ok(Self::Byte(c as u8))
                    }
                    _ => Err(format!(
                        "delimiter must be a single ASCII character, \"tab\" or \"auto\", got {s:?}"
                    )),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

/// Header names for the fields the rollup consumes. Lookup is case-insensitive.
///
/// The repository identifier comes either from `repository`, or from
/// `origin` + `path` joined as `origin/path` when both are set.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMapping {
    #[serde(default = "default_repository")]
    pub repository: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_recipe")]
    pub recipe: String,
    #[serde(default = "default_outcome")]
    pub outcome: String,
    #[serde(default = "default_detail")]
    pub detail: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            repository: default_repository(),
            origin: None,
            path: None,
            branch: None,
            recipe: default_recipe(),
            outcome: default_outcome(),
            detail: default_detail(),
            timestamp: None,
        }
    }
}

fn default_repository() -> Option<String> {
    Some("repository".into())
}

fn default_recipe() -> String {
    "recipe".into()
}

fn default_outcome() -> String {
    "outcome".into()
}

fn default_detail() -> Option<String> {
    Some("detail".into())
}

impl ColumnMapping {
    pub fn uses_origin_path(&self) -> bool {
        self.origin.is_some() && self.path.is_some()
    }
}

/// Keep only rows whose `column` holds one of `values`.
#[derive(Debug, Clone, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub values: Vec<String>,
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticsConfig {
    /// How many row errors are retained as samples in the report.
    #[serde(default = "default_sample_limit")]
    pub error_sample_limit: usize,
    /// Warn when unattributed rows exceed this share of folded rows.
    #[serde(default = "default_warn_ratio")]
    pub unattributed_warn_ratio: f64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            error_sample_limit: default_sample_limit(),
            unattributed_warn_ratio: default_warn_ratio(),
        }
    }
}

fn default_sample_limit() -> usize {
    20
}

fn default_warn_ratio() -> f64 {
    0.05
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl RollupConfig {
    pub fn from_toml(input: &str) -> Result<Self, RollupError> {
        let config: RollupConfig =
            toml::from_str(input).map_err(|e| RollupError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RollupError> {
        let input = &self.input;

        if !input.quote.is_ascii() {
            return Err(RollupError::ConfigValidation(format!(
                "quote must be an ASCII character, got {:?}",
                input.quote
            )));
        }
        if let Some(escape) = input.escape {
            if !escape.is_ascii() {
                return Err(RollupError::ConfigValidation(format!(
                    "escape must be an ASCII character, got {escape:?}"
                )));
            }
        }
        if let Delimiter::Byte(b) = input.delimiter {
            if b == input.quote as u8 {
                return Err(RollupError::ConfigValidation(
                    "delimiter and quote must differ".into(),
                ));
            }
        }

        let cols = &input.columns;
        if cols.origin.is_some() != cols.path.is_some() {
            return Err(RollupError::ConfigValidation(
                "columns.origin and columns.path must be set together".into(),
            ));
        }
        if !cols.uses_origin_path() && cols.repository.as_deref().map_or(true, str::is_empty) {
            return Err(RollupError::ConfigValidation(
                "a repository column (or origin + path) is required".into(),
            ));
        }
        if cols.recipe.is_empty() || cols.outcome.is_empty() {
            return Err(RollupError::ConfigValidation(
                "recipe and outcome columns must be named".into(),
            ));
        }

        if let Some(ref filter) = input.filter {
            if filter.column.is_empty() || filter.values.is_empty() {
                return Err(RollupError::ConfigValidation(
                    "filter needs a column and at least one value".into(),
                ));
            }
        }

        let ratio = self.diagnostics.unattributed_warn_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(RollupError::ConfigValidation(format!(
                "unattributed_warn_ratio must be within [0, 1], got {ratio}"
            )));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
