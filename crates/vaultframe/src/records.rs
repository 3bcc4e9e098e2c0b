//! Vault record operations: insert, detokenize and fetch by id.
//!
//! These run on the secure origin only. Request bodies are built from
//! already-validated inputs; responses are reshaped into the records the host
//! is allowed to see.

use crate::client::{Client, RequestMethod, VaultRequest};
use crate::connection::json::{flatten, set_path};
use crate::error::{ErrorBody, SdkError};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// How much of a revealed value the vault returns.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedactionType {
    #[default]
    PlainText,
    Masked,
    Redacted,
    Default,
}

impl RedactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactionType::PlainText => "PLAIN_TEXT",
            RedactionType::Masked => "MASKED",
            RedactionType::Redacted => "REDACTED",
            RedactionType::Default => "DEFAULT",
        }
    }
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertRecord {
    pub table: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOptions {
    /// Return tokens for the inserted values.
    #[serde(default = "yes")]
    pub tokens: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self { tokens: true }
    }
}

/// Options of a collect container's `collect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectOptions {
    #[serde(default = "yes")]
    pub tokens: bool,
    /// Non-sensitive fields inserted alongside the collected ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_fields: Option<Vec<InsertRecord>>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            tokens: true,
            additional_fields: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetokenizeRecord {
    pub token: String,
    #[serde(default)]
    pub redaction: RedactionType,
}

impl DetokenizeRecord {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            redaction: RedactionType::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetByIdRecord {
    pub ids: Vec<String>,
    pub table: String,
    #[serde(default)]
    pub redaction: RedactionType,
}

/// A token to reveal plus the frame that displays it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealRecord {
    pub token: String,
    #[serde(default)]
    pub redaction: RedactionType,
    pub frame: String,
}

/// One inserted value. With tokens on there is one entry per field,
/// otherwise one per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertedRecord {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skyflow_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertResponse {
    pub records: Vec<InsertedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    pub error: ErrorBody,
}

/// Partial success: revealed records and per-token failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevealResponse {
    pub records: Vec<Map<String, Value>>,
    pub errors: Vec<RecordError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    pub token: String,
}

/// What a reveal container resolves with: tokens only, never values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealSummary {
    pub success: Vec<TokenRef>,
    pub errors: Vec<RecordError>,
}

// ---- validation ---------------------------------------------------------------

pub fn validate_insert(records: &[InsertRecord]) -> Result<(), SdkError> {
    if records.is_empty() {
        return Err(SdkError::InvalidInput("records must not be empty".into()));
    }
    for (i, record) in records.iter().enumerate() {
        if record.table.trim().is_empty() {
            return Err(SdkError::InvalidInput(format!("records[{i}]: table is required")));
        }
        if record.fields.is_empty() {
            return Err(SdkError::InvalidInput(format!("records[{i}]: fields are required")));
        }
    }
    Ok(())
}

pub fn validate_detokenize(records: &[DetokenizeRecord]) -> Result<(), SdkError> {
    if records.is_empty() {
        return Err(SdkError::InvalidInput("records must not be empty".into()));
    }
    if let Some(i) = records.iter().position(|r| r.token.trim().is_empty()) {
        return Err(SdkError::InvalidInput(format!("records[{i}]: token is required")));
    }
    Ok(())
}

pub fn validate_get_by_id(records: &[GetByIdRecord]) -> Result<(), SdkError> {
    if records.is_empty() {
        return Err(SdkError::InvalidInput("records must not be empty".into()));
    }
    for (i, record) in records.iter().enumerate() {
        if record.table.trim().is_empty() {
            return Err(SdkError::InvalidInput(format!("records[{i}]: table is required")));
        }
        if record.ids.is_empty() || record.ids.iter().any(|id| id.trim().is_empty()) {
            return Err(SdkError::InvalidInput(format!("records[{i}]: ids are required")));
        }
    }
    Ok(())
}

// ---- payload shaping ----------------------------------------------------------

/// Group a flat `table.column.path -> value` payload into insert records.
pub fn records_from_payload(payload: &Map<String, Value>) -> Result<Vec<InsertRecord>, SdkError> {
    let mut tables: BTreeMap<String, Value> = BTreeMap::new();
    for (name, value) in payload {
        let (table, column) = name.split_once('.').ok_or_else(|| {
            SdkError::InvalidInput(format!("element name {name} must be table.column"))
        })?;
        let fields = tables
            .entry(table.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        set_path(fields, column, value.clone());
    }
    Ok(tables
        .into_iter()
        .map(|(table, fields)| InsertRecord {
            table,
            fields: match fields {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        })
        .collect())
}

/// Fold extra records into the collected ones. A column supplied twice is
/// an error.
pub fn merge_additional(
    mut records: Vec<InsertRecord>,
    extra: &[InsertRecord],
) -> Result<Vec<InsertRecord>, SdkError> {
    for add in extra {
        match records.iter_mut().find(|r| r.table == add.table) {
            Some(existing) => {
                for (key, value) in &add.fields {
                    if existing.fields.contains_key(key) {
                        return Err(SdkError::InvalidInput(format!(
                            "duplicate field {}.{key}",
                            add.table
                        )));
                    }
                    existing.fields.insert(key.clone(), value.clone());
                }
            }
            None => records.push(add.clone()),
        }
    }
    Ok(records)
}

// ---- vault calls --------------------------------------------------------------

fn vault_base(client: &Client) -> String {
    format!("{}/v1/vaults/{}", client.vault_url(), client.vault_id())
}

fn endpoint(base: &str, pairs: &[(&str, &str)]) -> Result<String, SdkError> {
    let mut url = url::Url::parse(base)
        .map_err(|e| SdkError::InvalidConfig(format!("vault url: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        for (k, v) in pairs {
            query.append_pair(k, v);
        }
    }
    Ok(url.to_string())
}

pub async fn insert(
    client: &Client,
    records: &[InsertRecord],
    options: &InsertOptions,
) -> Result<InsertResponse, SdkError> {
    let body = json!({
        "records": records
            .iter()
            .map(|r| json!({ "table": r.table, "fields": r.fields }))
            .collect::<Vec<_>>(),
        "tokenization": options.tokens,
    });
    debug!("inserting {} records", records.len());
    let reply = client
        .request(VaultRequest::new(RequestMethod::Post, vault_base(client)).body(body))
        .await?;
    Ok(insert_response(&reply, records, options.tokens))
}

fn insert_response(reply: &Value, request: &[InsertRecord], tokens: bool) -> InsertResponse {
    let mut out = Vec::new();
    let returned = reply["records"].as_array().cloned().unwrap_or_default();
    for (i, record) in returned.iter().enumerate() {
        let table = record["table"]
            .as_str()
            .map(str::to_string)
            .or_else(|| request.get(i).map(|r| r.table.clone()))
            .unwrap_or_default();
        let skyflow_id = record["skyflow_id"]
            .as_str()
            .or_else(|| record["fields"]["skyflow_id"].as_str())
            .map(str::to_string);
        let token_map = record.get("fields").or_else(|| record.get("tokens"));
        match token_map {
            Some(fields) if tokens => {
                for (field, token) in flatten(fields) {
                    if field == "skyflow_id" {
                        continue;
                    }
                    out.push(InsertedRecord {
                        table: table.clone(),
                        field: Some(field),
                        token: token.as_str().map(str::to_string),
                        skyflow_id: skyflow_id.clone(),
                    });
                }
            }
            _ => out.push(InsertedRecord {
                table,
                field: None,
                token: None,
                skyflow_id,
            }),
        }
    }
    InsertResponse { records: out }
}

/// Detokenize, one vault call per redaction type. A failed call marks all
/// of its tokens as errors; the other groups still succeed.
pub async fn detokenize(
    client: &Client,
    records: &[DetokenizeRecord],
) -> Result<RevealResponse, SdkError> {
    let mut groups: BTreeMap<RedactionType, Vec<String>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.redaction)
            .or_default()
            .push(record.token.clone());
    }

    let base = format!("{}/tokens", vault_base(client));
    let mut calls = Vec::with_capacity(groups.len());
    for (redaction, tokens) in groups {
        let mut pairs: Vec<(&str, &str)> = tokens.iter().map(|t| ("token_ids", t.as_str())).collect();
        pairs.push(("redaction", redaction.as_str()));
        let url = endpoint(&base, &pairs)?;
        calls.push(async move {
            let result = client
                .request(VaultRequest::new(RequestMethod::Get, url))
                .await;
            (tokens, result)
        });
    }

    let mut response = RevealResponse::default();
    for (tokens, result) in join_all(calls).await {
        match result {
            Ok(reply) => {
                for record in reply["records"].as_array().into_iter().flatten() {
                    response.records.push(revealed_record(record));
                }
            }
            Err(err) => {
                warn!("detokenize of {} tokens failed: {err}", tokens.len());
                let body = err.to_body();
                response
                    .errors
                    .extend(tokens.into_iter().map(|token| RecordError {
                        token: Some(token),
                        ids: None,
                        error: body.clone(),
                    }));
            }
        }
    }
    Ok(response)
}

/// `{token_id, fields}` and `{token, value}` both become `{token, ...}`.
fn revealed_record(record: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    let token = record
        .get("token_id")
        .or_else(|| record.get("token"))
        .cloned()
        .unwrap_or(Value::Null);
    out.insert("token".into(), token);
    match record.get("fields") {
        Some(Value::Object(fields)) => {
            for (k, v) in fields {
                out.insert(k.clone(), v.clone());
            }
        }
        _ => {
            if let Some(value) = record.get("value") {
                out.insert("value".into(), value.clone());
            }
        }
    }
    out
}

pub async fn get_by_id(
    client: &Client,
    records: &[GetByIdRecord],
) -> Result<RevealResponse, SdkError> {
    let base = vault_base(client);
    let mut calls = Vec::with_capacity(records.len());
    for record in records {
        let mut pairs: Vec<(&str, &str)> =
            record.ids.iter().map(|id| ("skyflow_ids", id.as_str())).collect();
        pairs.push(("redaction", record.redaction.as_str()));
        let url = endpoint(&format!("{base}/{}", record.table), &pairs)?;
        calls.push(async move {
            let result = client
                .request(VaultRequest::new(RequestMethod::Get, url))
                .await;
            (record, result)
        });
    }

    let mut response = RevealResponse::default();
    for (record, result) in join_all(calls).await {
        match result {
            Ok(reply) => {
                for row in reply["records"].as_array().into_iter().flatten() {
                    let mut fields = match row.get("fields") {
                        Some(Value::Object(fields)) => fields.clone(),
                        _ => Map::new(),
                    };
                    fields.insert("table".into(), Value::String(record.table.clone()));
                    response.records.push(fields);
                }
            }
            Err(err) => response.errors.push(RecordError {
                token: None,
                ids: Some(record.ids.clone()),
                error: err.to_body(),
            }),
        }
    }
    Ok(response)
}

/// Token to displayed value, for rendering inside reveal frames.
pub fn format_records_for_iframe(response: &RevealResponse) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for record in &response.records {
        let Some(token) = record.get("token").and_then(Value::as_str) else {
            continue;
        };
        let value = record
            .get("value")
            .or_else(|| record.iter().find(|(k, _)| k.as_str() != "token").map(|(_, v)| v));
        if let Some(value) = value {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.insert(token.to_string(), text);
        }
    }
    out
}

pub fn format_records_for_client(response: &RevealResponse) -> RevealSummary {
    RevealSummary {
        success: response
            .records
            .iter()
            .filter_map(|r| r.get("token").and_then(Value::as_str))
            .map(|token| TokenRef {
                token: token.to_string(),
            })
            .collect(),
        errors: response.errors.clone(),
    }
}
