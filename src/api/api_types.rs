//! Serde types matching the backend API's wire format.
//!
//! These types are separate from domain types so unknown fields survive a
//! read/modify/write cycle while domain types stay focused on the UI.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Incident record
// ============================================================================

/// Backend incident record (`ocorrência`).
///
/// Coordinates are decimal strings on the wire and stay strings here; they
/// are parsed by the mapper. Integer fields also accept numeric strings and
/// read anything else as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiOcorrencia {
  #[serde(
    default,
    deserialize_with = "deserialize_lenient_int",
    skip_serializing_if = "Option::is_none"
  )]
  pub id_ocorrencia: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub numero_bo: Option<String>,
  #[serde(
    default,
    deserialize_with = "deserialize_lenient_int",
    skip_serializing_if = "Option::is_none"
  )]
  pub id_tipo_crime: Option<i64>,
  #[serde(
    default,
    deserialize_with = "deserialize_lenient_int",
    skip_serializing_if = "Option::is_none"
  )]
  pub id_bairro: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub descricao_ocorrencia: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub endereco_ocorrencia: Option<String>,
  #[serde(
    default,
    deserialize_with = "deserialize_decimal_string",
    skip_serializing_if = "Option::is_none"
  )]
  pub latitude_ocorrencia: Option<String>,
  #[serde(
    default,
    deserialize_with = "deserialize_decimal_string",
    skip_serializing_if = "Option::is_none"
  )]
  pub longitude_ocorrencia: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status_ocorrencia: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data_registro: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data_ocorrencia: Option<String>,
  #[serde(
    default,
    deserialize_with = "deserialize_lenient_int",
    skip_serializing_if = "Option::is_none"
  )]
  pub quantidade_vitimas: Option<i64>,
  /// Kept exactly as sent (number, numeric string or free text).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub valor_prejuizo: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dia_semana: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub periodo_dia: Option<String>,
  // Catch-all for fields this client does not model
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

// ============================================================================
// Paginated list response
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiPage<T> {
  #[serde(default = "Vec::new")]
  pub items: Vec<T>,
  #[serde(default)]
  pub current_page: u32,
  #[serde(default)]
  pub per_page: u32,
  #[serde(default)]
  pub total_pages: u32,
  #[serde(default)]
  pub total_count: u64,
}

// ============================================================================
// Crime-type reference data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiTipoCrime {
  pub id_tipo_crime: i64,
  #[serde(default)]
  pub nome_tipo_crime: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub categoria: Option<String>,
  #[serde(default = "default_true")]
  pub ativo: bool,
}

fn default_true() -> bool {
  true
}

// ============================================================================
// Helpers
// ============================================================================

/// Accept a decimal as either a JSON string or a JSON number, keeping the
/// textual form.
fn deserialize_decimal_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Option::<Value>::deserialize(deserializer)? {
    Some(Value::String(s)) => Some(s),
    Some(Value::Number(n)) => Some(n.to_string()),
    _ => None,
  })
}

/// Accept an integer as a JSON number or a numeric string. Anything else
/// reads as absent.
fn deserialize_lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Option::<Value>::deserialize(deserializer)? {
    Some(Value::Number(n)) => n
      .as_i64()
      .or_else(|| n.as_f64().filter(|v| v.fract() == 0.0).map(|v| v as i64)),
    Some(Value::String(s)) => s.trim().parse().ok(),
    _ => None,
  })
}

impl ApiOcorrencia {
  /// Estimated loss as a number, when the wire value is one.
  pub fn loss_amount(&self) -> Option<f64> {
    let amount = match self.valor_prejuizo.as_ref()? {
      Value::Number(n) => n.as_f64(),
      Value::String(s) => s.trim().parse::<f64>().ok(),
      _ => None,
    };
    amount.filter(|v| v.is_finite())
  }
}
