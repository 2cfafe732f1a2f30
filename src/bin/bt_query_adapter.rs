use budget_tracker_lib::{
    query_accounts_at_db_path, query_analytics_at_db_path, query_automatic_transactions_at_db_path,
    query_budget_goals_at_db_path, query_budget_progress_at_db_path, query_transactions_at_db_path,
    runtime_db_health_check_at_db_path, AccountsQueryRequest, AnalyticsQueryRequest,
    AutomaticTransactionsQueryRequest, BudgetGoalsQueryRequest, BudgetProgressQueryRequest, LedgerError,
    TransactionsQueryRequest,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::io::{self, Read};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct AdapterRequest {
    schema_version: u64,
    case: Option<AdapterCaseMeta>,
    endpoint: AdapterEndpoint,
    #[serde(default)]
    query: Value,
    dataset: AdapterDataset,
}

#[derive(Debug, Deserialize)]
struct AdapterCaseMeta {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdapterEndpoint {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdapterDataset {
    db_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct AdapterErrorBody {
    category: String,
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
enum AdapterResponse {
    #[serde(rename = "success")]
    Success { payload: Value },
    #[serde(rename = "error")]
    Error { error: AdapterErrorBody },
}

/// Failures either come from the adapter protocol itself or from the ledger library.
enum AdapterFailure {
    Protocol { category: &'static str, message: String },
    Ledger(LedgerError),
}

impl From<LedgerError> for AdapterFailure {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

fn protocol_error(message: impl Into<String>) -> AdapterFailure {
    AdapterFailure::Protocol {
        category: "ADAPTER_PROTOCOL_ERROR",
        message: message.into(),
    }
}

fn error_response(failure: AdapterFailure) -> AdapterResponse {
    let (category, message, error_type) = match failure {
        AdapterFailure::Protocol { category, message } => (category.to_string(), message, "AdapterError"),
        AdapterFailure::Ledger(e) => (e.category().to_string(), e.to_string(), "LedgerError"),
    };
    AdapterResponse::Error {
        error: AdapterErrorBody {
            category,
            message,
            error_type: error_type.to_string(),
        },
    }
}

fn parse_bool_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn read_stdin() -> Result<String, AdapterFailure> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| protocol_error(format!("read stdin failed: {e}")))?;
    Ok(raw)
}

fn parse_request(raw: &str) -> Result<AdapterRequest, AdapterFailure> {
    if raw.trim().is_empty() {
        return Err(protocol_error("empty stdin request"));
    }
    let value =
        serde_json::from_str::<Value>(raw).map_err(|e| protocol_error(format!("invalid JSON request: {e}")))?;
    serde_json::from_value::<AdapterRequest>(value).map_err(|e| protocol_error(format!("request root invalid: {e}")))
}

/// A missing or null query means "no filters".
fn query_as<T: DeserializeOwned + Default>(query: Value, endpoint: &str) -> Result<T, AdapterFailure> {
    if query.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(query).map_err(|e| {
        AdapterFailure::Ledger(LedgerError::validation(format!(
            "request.query invalid for {endpoint}: {e}"
        )))
    })
}

fn dispatch(req: AdapterRequest) -> Result<Value, AdapterFailure> {
    if req.schema_version != 1 {
        return Err(protocol_error(format!("unsupported schema_version: {}", req.schema_version)));
    }

    let path = req
        .endpoint
        .path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| protocol_error("request.endpoint.path missing"))?;
    let db_path = req
        .dataset
        .db_path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| protocol_error("request.dataset.db_path missing"))?;
    let db = Path::new(db_path);

    let payload = match path {
        "/api/transactions" => {
            query_transactions_at_db_path(db, query_as::<TransactionsQueryRequest>(req.query, path)?)?
        }
        "/api/analytics" => query_analytics_at_db_path(db, query_as::<AnalyticsQueryRequest>(req.query, path)?)?,
        "/api/budget-progress" => {
            query_budget_progress_at_db_path(db, query_as::<BudgetProgressQueryRequest>(req.query, path)?)?
        }
        "/api/budget-goals" => query_budget_goals_at_db_path(db, query_as::<BudgetGoalsQueryRequest>(req.query, path)?)?,
        "/api/accounts" => query_accounts_at_db_path(db, query_as::<AccountsQueryRequest>(req.query, path)?)?,
        "/api/automatic-transactions" => query_automatic_transactions_at_db_path(
            db,
            query_as::<AutomaticTransactionsQueryRequest>(req.query, path)?,
        )?,
        "/api/health" => runtime_db_health_check_at_db_path(db, Utc::now()),
        _ => {
            return Err(AdapterFailure::Protocol {
                category: "UNSUPPORTED_ENDPOINT",
                message: format!("unsupported endpoint path: {path}"),
            })
        }
    };
    Ok(payload)
}

/// One stdin document in, one `{status, payload | error}` document out.
fn handle_request(raw: &str) -> AdapterResponse {
    let outcome = parse_request(raw).and_then(|req| {
        if let Some(case_id) = req.case.as_ref().and_then(|c| c.id.as_deref()) {
            log::debug!("[bt_query_adapter] case={case_id}");
        }
        if let Some(path) = req.endpoint.path.as_deref() {
            log::debug!("[bt_query_adapter] endpoint={path}");
        }
        if let Some(db_path) = req.dataset.db_path.as_deref() {
            log::debug!("[bt_query_adapter] db={db_path}");
        }
        dispatch(req)
    });
    match outcome {
        Ok(payload) => AdapterResponse::Success { payload },
        Err(failure) => error_response(failure),
    }
}

fn main() {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let pretty = parse_bool_flag(&args, "--pretty");
    let verbose = parse_bool_flag(&args, "--verbose");
    if verbose {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .target(env_logger::Target::Stderr)
            .init();
    }

    let resp = match read_stdin() {
        Ok(raw) => handle_request(&raw),
        Err(failure) => error_response(failure),
    };

    let out = if pretty {
        serde_json::to_string_pretty(&resp)
    } else {
        serde_json::to_string(&resp)
    }
    .unwrap_or_else(|e| {
        json!({
            "status": "error",
            "error": {
                "category": "ADAPTER_PROTOCOL_ERROR",
                "message": format!("serialize response failed: {e}"),
                "type": "SerializeError",
            }
        })
        .to_string()
    });

    print!("{out}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use budget_tracker_lib::{apply_embedded_migrations, upsert_account_at_db_path, AccountUpsertRequest};
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_db_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "bt_query_adapter_{name}_test_{}_{}.db",
            std::process::id(),
            Uuid::new_v4()
        ))
    }

    fn request(db_path: &Path, endpoint: &str, query: Value) -> String {
        json!({
            "schema_version": 1,
            "case": { "id": "adapter-test" },
            "endpoint": { "path": endpoint },
            "query": query,
            "dataset": { "db_path": db_path.to_string_lossy() },
        })
        .to_string()
    }

    fn respond(raw: &str) -> Value {
        serde_json::to_value(handle_request(raw)).expect("serialize response")
    }

    fn error_category(resp: &Value) -> &str {
        assert_eq!(resp["status"].as_str(), Some("error"), "unexpected response: {resp}");
        resp["error"]["category"].as_str().unwrap_or_default()
    }

    #[test]
    fn endpoints_dispatch_to_ledger_queries() {
        let db_path = temp_db_path("dispatch");
        apply_embedded_migrations(&db_path).expect("migrate");
        upsert_account_at_db_path(
            &db_path,
            AccountUpsertRequest {
                account_name: Some("Vadesiz".to_string()),
                bank_name: Some("VakıfBank".to_string()),
                balance: Some("250".to_string()),
                ..Default::default()
            },
        )
        .expect("seed account");

        let accounts = respond(&request(&db_path, "/api/accounts", Value::Null));
        assert_eq!(accounts["status"].as_str(), Some("success"));
        assert_eq!(accounts["payload"]["rows"][0]["account_name"].as_str(), Some("Vadesiz"));

        let transactions = respond(&request(&db_path, "/api/transactions", json!({ "keyword": "migros" })));
        assert_eq!(transactions["status"].as_str(), Some("success"));
        assert_eq!(transactions["payload"]["summary"]["count"].as_i64(), Some(0));

        for endpoint in [
            "/api/analytics",
            "/api/budget-progress",
            "/api/budget-goals",
            "/api/automatic-transactions",
            "/api/health",
        ] {
            let resp = respond(&request(&db_path, endpoint, Value::Null));
            assert_eq!(resp["status"].as_str(), Some("success"), "{endpoint}: {resp}");
        }
    }

    #[test]
    fn protocol_problems_map_to_adapter_categories() {
        let db_path = temp_db_path("protocol");
        let unknown = respond(&request(&db_path, "/api/nope", Value::Null));
        assert_eq!(error_category(&unknown), "UNSUPPORTED_ENDPOINT");
        assert_eq!(unknown["error"]["type"].as_str(), Some("AdapterError"));

        let wrong_version = json!({
            "schema_version": 2,
            "endpoint": { "path": "/api/accounts" },
            "dataset": { "db_path": db_path.to_string_lossy() },
        })
        .to_string();
        assert_eq!(error_category(&respond(&wrong_version)), "ADAPTER_PROTOCOL_ERROR");
        assert_eq!(error_category(&respond("   ")), "ADAPTER_PROTOCOL_ERROR");
        assert_eq!(error_category(&respond("{not json")), "ADAPTER_PROTOCOL_ERROR");

        let no_db = json!({ "schema_version": 1, "endpoint": { "path": "/api/accounts" }, "dataset": {} }).to_string();
        assert_eq!(error_category(&respond(&no_db)), "ADAPTER_PROTOCOL_ERROR");
    }

    #[test]
    fn ledger_errors_keep_their_category() {
        let fresh = temp_db_path("unmigrated");
        let unmigrated = respond(&request(&fresh, "/api/accounts", Value::Null));
        assert_eq!(error_category(&unmigrated), "VALIDATION_ERROR");
        assert_eq!(unmigrated["error"]["type"].as_str(), Some("LedgerError"));
        assert!(!fresh.exists());

        let db_path = temp_db_path("bad_query");
        apply_embedded_migrations(&db_path).expect("migrate");
        let bad_query = respond(&request(&db_path, "/api/transactions", json!({ "keyword": 42 })));
        assert_eq!(error_category(&bad_query), "VALIDATION_ERROR");
        let bad_month = respond(&request(&db_path, "/api/budget-progress", json!({ "month_year": "2026-13" })));
        assert_eq!(error_category(&bad_month), "VALIDATION_ERROR");
    }
}
