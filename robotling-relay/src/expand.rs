//! Expansion of accepted leaves into row cells
//!
//! `power/motor_load` and `sensor/distance_cm` arrive as list literals such as
//! `"[10, 12]"`. They are parsed with the JSON array grammar (never evaluated)
//! and must carry exactly as many elements as the topic has columns. Every other
//! topic becomes a single text cell.

use crate::snapshot::{Scalar, Snapshot};
use crate::topics::StatusTopic;
use serde_json::Value;

/// One value of a status row
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("{topic}: `{raw}` is not a list literal: {source}")]
    Literal {
        topic: &'static str,
        raw: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{topic}: expected {expected} values, got {found}")]
    Arity {
        topic: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{topic}: list element `{element}` is not a scalar")]
    Element { topic: &'static str, element: String },
    #[error("{topic}: expected a list, got `{found}`")]
    NotAList { topic: &'static str, found: String },
}

/// Expand one accepted leaf into the cells it contributes to the row
pub fn expand(topic: StatusTopic, value: &Snapshot) -> Result<Vec<Cell>, ExpandError> {
    if !topic.is_list() {
        return Ok(vec![text_cell(value)]);
    }

    let items = list_items(topic, value)?;
    if items.len() != topic.width() {
        return Err(ExpandError::Arity {
            topic: topic.suffix(),
            expected: topic.width(),
            found: items.len(),
        });
    }

    items
        .iter()
        .map(|item| match item {
            Snapshot::Scalar(scalar) => Ok(scalar_cell(scalar)),
            other => Err(ExpandError::Element {
                topic: topic.suffix(),
                element: other.to_string(),
            }),
        })
        .collect()
}

fn list_items(topic: StatusTopic, value: &Snapshot) -> Result<Vec<Snapshot>, ExpandError> {
    match value {
        Snapshot::Sequence(items) => Ok(items.clone()),
        Snapshot::Scalar(Scalar::Text(raw)) => parse_list_literal(raw).map_err(|source| {
            ExpandError::Literal {
                topic: topic.suffix(),
                raw: raw.clone(),
                source,
            }
        }),
        other => Err(ExpandError::NotAList {
            topic: topic.suffix(),
            found: other.to_string(),
        }),
    }
}

/// Strict list-literal parser: a JSON array and nothing else
pub fn parse_list_literal(raw: &str) -> Result<Vec<Snapshot>, serde_json::Error> {
    let items: Vec<Value> = serde_json::from_str(raw)?;
    Ok(items.into_iter().map(Snapshot::from).collect())
}

fn scalar_cell(scalar: &Scalar) -> Cell {
    match scalar {
        Scalar::Null => Cell::Null,
        Scalar::Bool(b) => Cell::Integer(i64::from(*b)),
        Scalar::Number(n) => match n.as_i64() {
            Some(i) => Cell::Integer(i),
            None => Cell::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Scalar::Text(s) => Cell::Text(s.clone()),
    }
}

fn text_cell(value: &Snapshot) -> Cell {
    match value {
        Snapshot::Scalar(Scalar::Null) => Cell::Null,
        other => Cell::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Snapshot {
        Snapshot::Scalar(Scalar::Text(s.into()))
    }

    #[test]
    fn test_motor_load_pair() {
        let cells = expand(StatusTopic::MotorLoad, &text("[10, 20]")).unwrap();
        assert_eq!(cells, vec![Cell::Integer(10), Cell::Integer(20)]);
    }

    #[test]
    fn test_distance_triple_keeps_order_and_type() {
        let cells = expand(StatusTopic::Distance, &text("[12.5, 3, -1]")).unwrap();
        assert_eq!(cells, vec![Cell::Real(12.5), Cell::Integer(3), Cell::Integer(-1)]);
    }

    #[test]
    fn test_structured_array_accepted() {
        let value = Snapshot::parse("[4, 5]").unwrap();
        let cells = expand(StatusTopic::MotorLoad, &value).unwrap();
        assert_eq!(cells, vec![Cell::Integer(4), Cell::Integer(5)]);
    }

    #[test]
    fn test_single_value_topics_become_text() {
        assert_eq!(
            expand(StatusTopic::State, &text("IDLE")).unwrap(),
            vec![Cell::Text("IDLE".into())]
        );
        let voltage = Snapshot::parse("7.4").unwrap();
        assert_eq!(
            expand(StatusTopic::BatteryVoltage, &voltage).unwrap(),
            vec![Cell::Text("7.4".into())]
        );
        let null = Snapshot::Scalar(Scalar::Null);
        assert_eq!(expand(StatusTopic::Pitch, &null).unwrap(), vec![Cell::Null]);
    }

    #[test]
    fn test_wrong_arity_rejected() {
        let err = expand(StatusTopic::Distance, &text("[1, 2]")).unwrap_err();
        assert!(matches!(err, ExpandError::Arity { expected: 3, found: 2, .. }));
        let err = expand(StatusTopic::MotorLoad, &text("[1, 2, 3]")).unwrap_err();
        assert!(matches!(err, ExpandError::Arity { expected: 2, found: 3, .. }));
    }

    #[test]
    fn test_code_is_never_evaluated() {
        for raw in ["__import__('os').system('true')", "(1, 2)", "[1, 2", "1 + 1", "[1, 2] [3]"] {
            let err = expand(StatusTopic::MotorLoad, &text(raw)).unwrap_err();
            assert!(matches!(err, ExpandError::Literal { .. }), "accepted {raw}");
        }
    }

    #[test]
    fn test_nested_elements_rejected() {
        let err = expand(StatusTopic::MotorLoad, &text("[[1], 2]")).unwrap_err();
        assert!(matches!(err, ExpandError::Element { .. }));
        let err = expand(StatusTopic::MotorLoad, &Snapshot::parse("12").unwrap()).unwrap_err();
        assert!(matches!(err, ExpandError::NotAList { .. }));
    }
}
