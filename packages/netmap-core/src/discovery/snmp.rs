//! SNMPv2c table walks via GETNEXT

use super::{ProtocolTransport, ProtocolValue, VarBind};
use crate::error::ProtocolError;
use async_trait::async_trait;
use snmp2::{AsyncSession, Oid, Value};
use std::time::Duration;
use tokio::time::timeout;

/// Default SNMP agent port.
pub const SNMP_PORT: u16 = 161;

/// Rows fetched per walk before giving up on a runaway table.
const DEFAULT_MAX_ROWS: usize = 4096;

#[derive(Debug, Clone)]
pub struct SnmpTransport {
    port: u16,
    request_timeout: Duration,
    max_rows: usize,
}

impl Default for SnmpTransport {
    fn default() -> Self {
        Self {
            port: SNMP_PORT,
            request_timeout: Duration::from_millis(1000),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

impl SnmpTransport {
    pub fn new(port: u16, request_timeout: Duration) -> Self {
        Self {
            port,
            request_timeout,
            ..Self::default()
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }
}

/// Parse a dotted OID into its arcs.
pub fn parse_oid(oid: &str) -> Result<Vec<u64>, ProtocolError> {
    let trimmed = oid.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return Err(ProtocolError::InvalidOid(oid.to_string()));
    }
    trimmed
        .split('.')
        .map(|arc| arc.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ProtocolError::InvalidOid(oid.to_string()))
}

/// `true` when `candidate` lies strictly below `root`.
pub fn is_under(root: &[u64], candidate: &[u64]) -> bool {
    candidate.len() > root.len() && candidate.starts_with(root)
}

fn convert_value(value: &Value<'_>) -> ProtocolValue {
    match value {
        Value::OctetString(bytes) => ProtocolValue::OctetString(bytes.to_vec()),
        Value::Integer(i) => ProtocolValue::Integer(*i),
        Value::Counter32(c) => ProtocolValue::Integer(i64::from(*c)),
        Value::Unsigned32(u) => ProtocolValue::Integer(i64::from(*u)),
        Value::Timeticks(t) => ProtocolValue::Integer(i64::from(*t)),
        other => ProtocolValue::Other(format!("{:?}", other)),
    }
}

#[async_trait]
impl ProtocolTransport for SnmpTransport {
    fn protocol(&self) -> &'static str {
        "snmp"
    }

    async fn walk(
        &self,
        target: &str,
        credential: &str,
        oid: &str,
    ) -> Result<Vec<VarBind>, ProtocolError> {
        let root = parse_oid(oid)?;
        let addr = format!("{}:{}", target, self.port);
        let transport_err = |message: String| ProtocolError::Transport {
            target: target.to_string(),
            message,
        };

        let mut session = match timeout(
            self.request_timeout,
            AsyncSession::new_v2c(&addr, credential.as_bytes(), 0),
        )
        .await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(transport_err(format!("{:?}", e))),
            Err(_) => {
                return Err(ProtocolError::Timeout {
                    target: target.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                });
            }
        };

        let mut rows = Vec::new();
        let mut cursor = root.clone();

        while rows.len() < self.max_rows {
            let request_oid =
                Oid::from(&cursor).map_err(|_| ProtocolError::InvalidOid(format!("{:?}", cursor)))?;

            let mut response = match timeout(self.request_timeout, session.getnext(&request_oid)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(transport_err(format!("{:?}", e))),
                Err(_) => {
                    return Err(ProtocolError::Timeout {
                        target: target.to_string(),
                        timeout_ms: self.request_timeout.as_millis() as u64,
                    });
                }
            };

            let Some((next_oid, value)) = response.varbinds.next() else {
                break;
            };

            if matches!(value, Value::EndOfMibView | Value::NoSuchObject | Value::NoSuchInstance) {
                break;
            }

            let next_text = next_oid.to_id_string();
            let next = parse_oid(&next_text).map_err(|_| ProtocolError::MalformedResponse {
                target: target.to_string(),
                message: format!("unparseable OID '{}'", next_text),
            })?;

            if !is_under(&root, &next) {
                break;
            }
            if next <= cursor {
                return Err(ProtocolError::MalformedResponse {
                    target: target.to_string(),
                    message: format!("walk did not advance past {}", next_text),
                });
            }

            rows.push(VarBind::new(next_text, convert_value(&value)));
            cursor = next;
        }

        if rows.len() >= self.max_rows {
            tracing::warn!(
                "Walk of {} on {} stopped at {} rows",
                oid,
                target,
                self.max_rows
            );
        }

        tracing::trace!("Walked {} rows of {} on {}", rows.len(), oid, target);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_oid() {
        assert_eq!(parse_oid(".1.3.6.1").unwrap(), vec![1, 3, 6, 1]);
        assert_eq!(parse_oid("1.3.6.1.2.1.17.4.3.1.1").unwrap().len(), 11);
        assert!(matches!(parse_oid("1.3.x"), Err(ProtocolError::InvalidOid(_))));
        assert!(parse_oid("").is_err());
    }

    #[test]
    fn test_is_under() {
        let root = parse_oid(super::super::FDB_PORT_OID).unwrap();
        let row = parse_oid("1.3.6.1.2.1.17.4.3.1.2.0.17.50.1.2.3").unwrap();
        let next_column = parse_oid("1.3.6.1.2.1.17.4.3.1.3.0.17.50.1.2.3").unwrap();
        assert!(is_under(&root, &row));
        assert!(!is_under(&root, &next_column));
        assert!(!is_under(&root, &root));
    }

    #[tokio::test]
    async fn test_invalid_oid_fails_before_network() {
        let transport = SnmpTransport::default();
        let result = transport.walk("127.0.0.1", "public", "not.an.oid").await;
        assert!(matches!(result, Err(ProtocolError::InvalidOid(_))));
    }
}
