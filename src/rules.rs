use csv::{ReaderBuilder, WriterBuilder};
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::categories::TransactionCategory;
use crate::errors::{IoContext, LedgerError, LedgerResult};

const CATEGORY_RULES_FILE_NAME: &str = "category_rules.csv";
const DEFAULT_CATEGORY_RULES_CSV: &str = include_str!("../data/rules/category_rules.csv");
const CATEGORY_RULE_HEADERS: &[&str] = &["priority", "match_type", "pattern", "category", "note"];
const RULE_MATCH_TYPES: &[&str] = &["exact", "contains", "prefix", "regex"];
const DEFAULT_RULE_PRIORITY: i64 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct RulesListQueryRequest {
    pub keyword: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoryRuleUpsertRequest {
    pub priority: Option<String>,
    pub match_type: Option<String>,
    pub pattern: Option<String>,
    pub category: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoryRuleDeleteRequest {
    pub match_type: Option<String>,
    pub pattern: Option<String>,
}

#[derive(Debug, Clone)]
enum RuleMatcher {
    Exact(String),
    Contains(Vec<String>),
    Prefix(String),
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub priority: i64,
    pub pattern: String,
    pub category: TransactionCategory,
    matcher: RuleMatcher,
}

impl CategoryRule {
    pub fn new(
        priority: i64,
        match_type: &str,
        pattern: &str,
        category: TransactionCategory,
    ) -> LedgerResult<Self> {
        let lowered = pattern.trim().to_lowercase();
        let matcher = match match_type {
            "exact" => RuleMatcher::Exact(lowered),
            "prefix" => RuleMatcher::Prefix(lowered),
            "regex" => RuleMatcher::Regex(Regex::new(pattern.trim()).map_err(|e| {
                LedgerError::validation(format!("invalid regex pattern {pattern}: {e}"))
            })?),
            "contains" => RuleMatcher::Contains(
                lowered
                    .split('|')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            other => {
                return Err(LedgerError::validation(format!(
                    "match_type must be one of exact/contains/prefix/regex, got {other}"
                )))
            }
        };
        Ok(Self {
            priority,
            pattern: pattern.trim().to_string(),
            category,
            matcher,
        })
    }

    pub fn matches(&self, description: &str) -> bool {
        let target = description.trim().to_lowercase();
        match &self.matcher {
            RuleMatcher::Exact(p) => target == *p,
            RuleMatcher::Prefix(p) => target.starts_with(p.as_str()),
            RuleMatcher::Contains(parts) => parts.iter().any(|p| target.contains(p.as_str())),
            RuleMatcher::Regex(re) => re.is_match(description),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Categorization {
    pub category: TransactionCategory,
    /// `rule`, `keyword` or `default`.
    pub source: &'static str,
    pub rule_pattern: Option<String>,
}

/// User rules first (ascending priority), then the built-in keyword heuristic.
pub fn categorize(description: &str, rules: &[CategoryRule]) -> Categorization {
    if let Some(rule) = rules.iter().find(|r| r.matches(description)) {
        return Categorization {
            category: rule.category,
            source: "rule",
            rule_pattern: Some(rule.pattern.clone()),
        };
    }
    let category = TransactionCategory::from_description(description);
    Categorization {
        category,
        source: if category == TransactionCategory::Other {
            "default"
        } else {
            "keyword"
        },
        rule_pattern: None,
    }
}

/// Creates the rules directory and writes the bundled defaults when the file is missing.
pub fn ensure_rules_dir_seeded(rules_dir: &Path) -> LedgerResult<PathBuf> {
    fs::create_dir_all(rules_dir).io_context("create rules directory")?;
    let path = rules_dir.join(CATEGORY_RULES_FILE_NAME);
    if !path.exists() {
        fs::write(&path, DEFAULT_CATEGORY_RULES_CSV)
            .io_context(&format!("seed {}", path.display()))?;
    }
    Ok(path)
}

fn read_csv_rows(path: &Path) -> LedgerResult<Vec<BTreeMap<String, String>>> {
    let mut rows = Vec::<BTreeMap<String, String>>::new();
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    for rec in reader.records() {
        let record = rec?;
        let mut row = BTreeMap::<String, String>::new();
        let mut has_any = false;
        for (idx, key) in CATEGORY_RULE_HEADERS.iter().enumerate() {
            let val = record.get(idx).unwrap_or_default().trim().to_string();
            if !val.is_empty() {
                has_any = true;
            }
            row.insert((*key).to_string(), val);
        }
        if has_any {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn write_csv_rows(path: &Path, rows: &[BTreeMap<String, String>]) -> LedgerResult<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_path(path)?;
    writer.write_record(CATEGORY_RULE_HEADERS)?;
    for row in rows {
        let record = CATEGORY_RULE_HEADERS
            .iter()
            .map(|h| row.get(*h).cloned().unwrap_or_default())
            .collect::<Vec<_>>();
        writer.write_record(record)?;
    }
    writer.flush().io_context(&format!("flush {}", path.display()))
}

fn row_field<'a>(row: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    row.get(key).map(|s| s.as_str()).unwrap_or_default()
}

fn row_priority(row: &BTreeMap<String, String>) -> i64 {
    row_field(row, "priority")
        .parse::<i64>()
        .unwrap_or(DEFAULT_RULE_PRIORITY)
}

fn sort_category_rows(rows: &mut [BTreeMap<String, String>]) {
    rows.sort_by(|a, b| {
        row_priority(a)
            .cmp(&row_priority(b))
            .then_with(|| row_field(a, "match_type").cmp(row_field(b, "match_type")))
            .then_with(|| row_field(a, "pattern").cmp(row_field(b, "pattern")))
    });
}

fn row_to_json(row: &BTreeMap<String, String>) -> Value {
    let mut obj = serde_json::Map::new();
    for h in CATEGORY_RULE_HEADERS {
        obj.insert((*h).to_string(), json!(row_field(row, h)));
    }
    Value::Object(obj)
}

/// Loads the rule file, skipping rows that do not compile. Sorted by priority.
pub fn load_category_rules(rules_dir: &Path) -> LedgerResult<Vec<CategoryRule>> {
    let path = ensure_rules_dir_seeded(rules_dir)?;
    let mut out = Vec::new();
    for row in read_csv_rows(&path)? {
        let match_type = row_field(&row, "match_type").to_lowercase();
        let match_type = if match_type.is_empty() {
            "contains".to_string()
        } else {
            match_type
        };
        let pattern = row_field(&row, "pattern");
        let Some(category) = TransactionCategory::parse(row_field(&row, "category")) else {
            warn!("skipping rule {pattern:?}: unknown category {:?}", row_field(&row, "category"));
            continue;
        };
        if pattern.is_empty() {
            continue;
        }
        match CategoryRule::new(row_priority(&row), &match_type, pattern, category) {
            Ok(rule) => out.push(rule),
            Err(e) => warn!("skipping rule {pattern:?}: {e}"),
        }
    }
    out.sort_by_key(|r| r.priority);
    Ok(out)
}

pub fn query_category_rules(rules_dir: &Path, req: RulesListQueryRequest) -> LedgerResult<Value> {
    let keyword = req.keyword.unwrap_or_default().trim().to_lowercase();
    let limit = req.limit.unwrap_or(200).clamp(1, 500);
    let path = ensure_rules_dir_seeded(rules_dir)?;
    let mut rows = read_csv_rows(&path)?;
    if !keyword.is_empty() {
        rows.retain(|row| {
            let hay = format!(
                "{} {} {} {}",
                row_field(row, "match_type"),
                row_field(row, "pattern"),
                row_field(row, "category"),
                row_field(row, "note")
            )
            .to_lowercase();
            hay.contains(&keyword)
        });
    }
    sort_category_rows(&mut rows);
    rows.truncate(limit as usize);
    Ok(json!({
        "summary": {
            "count": rows.len(),
            "keyword": keyword,
            "limit": limit,
            "file_path": path.to_string_lossy().to_string(),
        },
        "rows": rows.iter().map(row_to_json).collect::<Vec<_>>(),
    }))
}

pub fn upsert_category_rule(rules_dir: &Path, req: CategoryRuleUpsertRequest) -> LedgerResult<Value> {
    let match_type = req
        .match_type
        .unwrap_or_else(|| "contains".to_string())
        .trim()
        .to_lowercase();
    let pattern = req.pattern.unwrap_or_default().trim().to_string();
    let note = req.note.unwrap_or_default().trim().to_string();
    if !RULE_MATCH_TYPES.contains(&match_type.as_str()) {
        return Err(LedgerError::validation(
            "match_type must be one of exact/contains/prefix/regex",
        ));
    }
    if pattern.is_empty() {
        return Err(LedgerError::validation("pattern is required"));
    }
    let category_text = req.category.unwrap_or_default();
    let category = TransactionCategory::parse(&category_text).ok_or_else(|| {
        LedgerError::validation(format!("unknown category: {}", category_text.trim()))
    })?;
    let priority_text = req.priority.unwrap_or_default();
    let priority = if priority_text.trim().is_empty() {
        DEFAULT_RULE_PRIORITY
    } else {
        priority_text
            .trim()
            .parse::<i64>()
            .map_err(|_| LedgerError::validation("priority must be an integer"))?
    };
    // Compiling here rejects broken regexes before they reach the file.
    CategoryRule::new(priority, &match_type, &pattern, category)?;

    let path = ensure_rules_dir_seeded(rules_dir)?;
    let mut rows = read_csv_rows(&path)?;
    let existing = rows.iter().position(|row| {
        row_field(row, "match_type") == match_type && row_field(row, "pattern") == pattern
    });
    let updated = existing.is_some();
    let idx = match existing {
        Some(idx) => idx,
        None => {
            rows.push(BTreeMap::new());
            rows.len() - 1
        }
    };
    let target = &mut rows[idx];
    target.insert("priority".to_string(), priority.to_string());
    target.insert("match_type".to_string(), match_type.clone());
    target.insert("pattern".to_string(), pattern.clone());
    target.insert("category".to_string(), category.code().to_string());
    target.insert("note".to_string(), note.clone());

    sort_category_rows(&mut rows);
    write_csv_rows(&path, &rows)?;
    Ok(json!({
        "updated": updated,
        "file_path": path.to_string_lossy().to_string(),
        "row": {
            "priority": priority.to_string(),
            "match_type": match_type,
            "pattern": pattern,
            "category": category.code(),
            "category_name": category.display_name(),
            "note": note,
        }
    }))
}

pub fn delete_category_rule(rules_dir: &Path, req: CategoryRuleDeleteRequest) -> LedgerResult<Value> {
    let match_type = req
        .match_type
        .unwrap_or_else(|| "contains".to_string())
        .trim()
        .to_lowercase();
    let pattern = req.pattern.unwrap_or_default().trim().to_string();
    if pattern.is_empty() {
        return Err(LedgerError::validation("pattern is required"));
    }
    let path = ensure_rules_dir_seeded(rules_dir)?;
    let mut rows = read_csv_rows(&path)?;
    let before = rows.len();
    rows.retain(|row| {
        !(row_field(row, "match_type") == match_type && row_field(row, "pattern") == pattern)
    });
    let deleted = before.saturating_sub(rows.len());
    write_csv_rows(&path, &rows)?;
    Ok(json!({
        "deleted": deleted > 0,
        "deleted_count": deleted,
        "file_path": path.to_string_lossy().to_string(),
        "match_type": match_type,
        "pattern": pattern,
    }))
}
