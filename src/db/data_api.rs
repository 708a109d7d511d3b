//! Stateless connector for the RDS Data API.
//!
//! Every call is a discrete, authenticated HTTP request carrying the full
//! SQL text and resource identifiers. There is no persistent socket and no
//! pool; throttling is handled with bounded exponential backoff instead.

use crate::db::backend::DataApiParams;
use crate::db::params::{QueryOutput, SqlParam, rewrite_placeholders};
use crate::error::{DbError, DbResult};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_rdsdata::Client;
use aws_sdk_rdsdata::error::ProvideErrorMetadata;
use aws_sdk_rdsdata::operation::execute_statement::ExecuteStatementOutput;
use aws_sdk_rdsdata::types::{Field, SqlParameter, TypeHint};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

const BACKOFF_BASE_MS: u64 = 200;

/// Executor for the `data-api-relational` backend.
#[derive(Debug, Clone)]
pub struct DataApiExecutor {
    client: Client,
    params: DataApiParams,
    max_retries: u32,
}

impl DataApiExecutor {
    /// Build the API client. This is an offline operation; connectivity and
    /// credential problems surface on the first request.
    pub async fn connect(params: DataApiParams, max_retries: u32) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(params.region.clone()))
            .load()
            .await;
        Self {
            client: Client::new(&shared),
            params,
            max_retries,
        }
    }

    /// Execute one statement, retrying on throttling.
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> DbResult<QueryOutput> {
        let sql = rewrite_placeholders(sql);
        let parameters: Vec<SqlParameter> = params
            .iter()
            .enumerate()
            .map(|(i, p)| to_sql_parameter(i, p))
            .collect();

        let mut attempt = 0u32;
        loop {
            let mut request = self
                .client
                .execute_statement()
                .resource_arn(&self.params.cluster_arn)
                .secret_arn(&self.params.secret_arn)
                .database(&self.params.database)
                .sql(&sql)
                .include_result_metadata(true);
            if !parameters.is_empty() {
                request = request.set_parameters(Some(parameters.clone()));
            }

            match request.send().await {
                Ok(output) => {
                    debug!(
                        rows = output.records().len(),
                        "Data API statement executed"
                    );
                    return Ok(convert_output(output));
                }
                Err(err) => {
                    let code = err.code().unwrap_or("").to_string();
                    if is_throttle_code(&code) && attempt < self.max_retries {
                        let delay = Duration::from_millis(BACKOFF_BASE_MS << attempt);
                        warn!(
                            code = %code,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Data API throttled, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    let message = err
                        .message()
                        .map(str::to_string)
                        .unwrap_or_else(|| err.to_string());
                    let message = if code.is_empty() {
                        message
                    } else {
                        format!("{code}: {message}")
                    };
                    return Err(DbError::data_api(message, is_throttle_code(&code)));
                }
            }
        }
    }

    /// Nothing persistent to tear down; present for connector symmetry.
    pub async fn close(&self) {
        debug!("Data API executor released");
    }
}

/// Codes the Data API reports for transient capacity conditions.
fn is_throttle_code(code: &str) -> bool {
    matches!(
        code,
        "ThrottlingException" | "TooManyRequestsException" | "DatabaseResumingException"
    )
}

fn to_sql_parameter(idx: usize, param: &SqlParam) -> SqlParameter {
    let builder = SqlParameter::builder().name(format!("p{}", idx + 1));
    match param {
        SqlParam::Null => builder.value(Field::IsNull(true)).build(),
        SqlParam::Bool(v) => builder.value(Field::BooleanValue(*v)).build(),
        SqlParam::Int(v) => builder.value(Field::LongValue(*v)).build(),
        SqlParam::Float(v) => builder.value(Field::DoubleValue(*v)).build(),
        SqlParam::Text(v) => builder.value(Field::StringValue(v.clone())).build(),
        SqlParam::Json(v) => builder
            .value(Field::StringValue(v.to_string()))
            .type_hint(TypeHint::Json)
            .build(),
    }
}

fn convert_output(output: ExecuteStatementOutput) -> QueryOutput {
    let columns: Vec<String> = output
        .column_metadata()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            col.name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("column_{i}"))
        })
        .collect();

    let rows = output
        .records()
        .iter()
        .map(|record| {
            record
                .iter()
                .enumerate()
                .map(|(i, field)| {
                    let name = columns
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| format!("column_{i}"));
                    (name, field_to_json(field))
                })
                .collect()
        })
        .collect();

    QueryOutput {
        rows,
        rows_affected: output.number_of_records_updated().max(0) as u64,
    }
}

fn field_to_json(field: &Field) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match field {
        Field::IsNull(_) => JsonValue::Null,
        Field::BooleanValue(v) => JsonValue::Bool(*v),
        Field::LongValue(v) => JsonValue::Number((*v).into()),
        Field::DoubleValue(v) => serde_json::Number::from_f64(*v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string())),
        Field::StringValue(v) => JsonValue::String(v.clone()),
        Field::BlobValue(b) => JsonValue::String(STANDARD.encode(b.as_ref())),
        _ => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_are_named_positionally() {
        let p = to_sql_parameter(0, &SqlParam::Int(7));
        assert_eq!(p.name(), Some("p1"));
        assert!(matches!(p.value(), Some(Field::LongValue(7))));

        let p = to_sql_parameter(2, &SqlParam::from("abc"));
        assert_eq!(p.name(), Some("p3"));
    }

    #[test]
    fn test_json_parameter_carries_type_hint() {
        let p = to_sql_parameter(0, &SqlParam::Json(serde_json::json!({"a": 1})));
        assert_eq!(p.type_hint(), Some(&TypeHint::Json));
    }

    #[test]
    fn test_null_parameter() {
        let p = to_sql_parameter(0, &SqlParam::Null);
        assert!(matches!(p.value(), Some(Field::IsNull(true))));
    }

    #[test]
    fn test_field_conversion() {
        assert_eq!(field_to_json(&Field::IsNull(true)), JsonValue::Null);
        assert_eq!(field_to_json(&Field::BooleanValue(true)), JsonValue::Bool(true));
        assert_eq!(
            field_to_json(&Field::StringValue("x".to_string())),
            JsonValue::String("x".to_string())
        );
        assert_eq!(field_to_json(&Field::LongValue(5)), serde_json::json!(5));
    }

    #[test]
    fn test_throttle_codes() {
        assert!(is_throttle_code("ThrottlingException"));
        assert!(is_throttle_code("DatabaseResumingException"));
        assert!(!is_throttle_code("BadRequestException"));
        assert!(!is_throttle_code(""));
    }
}
