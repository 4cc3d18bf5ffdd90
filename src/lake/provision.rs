//! Create-or-reuse a Q Dev connection.
//!
//! Idempotency is decided locally: list the existing connections, reuse a
//! match, and only create when none matches.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::client::LakeClient;
use super::types::{Connection, ConnectionRequest, ConnectionSettings};
use super::{LakeError, LakeResult};

/// What counts as "already provisioned".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Reuse a connection whose name equals the configured name.
    #[default]
    Name,
    /// Reuse the first existing connection, whatever its name.
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionOutcome {
    pub connection: Connection,
    /// False when an existing connection was reused.
    pub created: bool,
}

/// The remote surface the provisioner needs.
pub trait ConnectionRegistry {
    fn list_connections(&self) -> LakeResult<Vec<Connection>>;
    fn create_connection(&self, request: &ConnectionRequest) -> LakeResult<Connection>;
}

impl ConnectionRegistry for LakeClient {
    fn list_connections(&self) -> LakeResult<Vec<Connection>> {
        LakeClient::list_connections(self)
    }

    fn create_connection(&self, request: &ConnectionRequest) -> LakeResult<Connection> {
        LakeClient::create_connection(self, request)
    }
}

/// Pick the connection to reuse, if any.
pub fn find_match<'a>(
    existing: &'a [Connection],
    name: &str,
    policy: MatchPolicy,
) -> Option<&'a Connection> {
    match policy {
        MatchPolicy::Name => existing.iter().find(|c| c.name == name),
        MatchPolicy::Any => existing.first(),
    }
}

pub fn ensure_connection<R>(
    registry: &R,
    settings: &ConnectionSettings,
    policy: MatchPolicy,
) -> LakeResult<ProvisionOutcome>
where
    R: ConnectionRegistry + ?Sized,
{
    let name = settings.name();
    let existing = registry.list_connections()?;

    if let Some(found) = find_match(&existing, name, policy) {
        info!(
            connection_id = found.id,
            name = %found.name,
            existing = existing.len(),
            "reusing existing connection"
        );
        return Ok(ProvisionOutcome {
            connection: found.clone(),
            created: false,
        });
    }
    if policy == MatchPolicy::Name && !existing.is_empty() {
        warn!(
            name,
            existing = existing.len(),
            "no connection with the configured name; creating a new one"
        );
    }

    let missing = settings.missing_fields();
    if !missing.is_empty() {
        return Err(LakeError::local_validation(format!(
            "connection settings missing required fields: {}",
            missing.join(", ")
        )));
    }

    let connection = registry.create_connection(&settings.to_request())?;
    info!(connection_id = connection.id, name = %connection.name, "connection created");
    Ok(ProvisionOutcome {
        connection,
        created: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// In-memory registry that assigns ids sequentially.
    #[derive(Default)]
    struct FakeRegistry {
        connections: Mutex<Vec<Connection>>,
        creates: Mutex<usize>,
    }

    impl ConnectionRegistry for FakeRegistry {
        fn list_connections(&self) -> LakeResult<Vec<Connection>> {
            Ok(self.connections.lock().clone())
        }

        fn create_connection(&self, request: &ConnectionRequest) -> LakeResult<Connection> {
            *self.creates.lock() += 1;
            let mut conns = self.connections.lock();
            let conn = Connection {
                id: conns.len() as i64 + 1,
                name: request.name.clone(),
                region: Some(request.region.clone()),
                bucket: Some(request.bucket.clone()),
                identity_store_id: request.identity_store_id.clone(),
                identity_store_region: Some(request.identity_store_region.clone()),
                rate_limit_per_hour: Some(request.rate_limit_per_hour),
            };
            conns.push(conn.clone());
            Ok(conn)
        }
    }

    fn conn(id: i64, name: &str) -> Connection {
        Connection {
            id,
            name: name.into(),
            region: None,
            bucket: None,
            identity_store_id: None,
            identity_store_region: None,
            rate_limit_per_hour: None,
        }
    }

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            access_key_id: "AKIA1234".into(),
            secret_access_key: "secret".into(),
            region: "us-east-1".into(),
            bucket: "bucket".into(),
            ..Default::default()
        }
    }

    #[test]
    fn second_call_reuses_first() {
        let reg = FakeRegistry::default();
        let first = ensure_connection(&reg, &settings(), MatchPolicy::Name).unwrap();
        let second = ensure_connection(&reg, &settings(), MatchPolicy::Name).unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.connection.id, second.connection.id);
        assert_eq!(*reg.creates.lock(), 1);
    }

    #[test]
    fn name_policy_ignores_other_names() {
        let reg = FakeRegistry::default();
        reg.connections.lock().push(conn(1, "someone_else"));
        let out = ensure_connection(&reg, &settings(), MatchPolicy::Name).unwrap();
        assert!(out.created);
        assert_eq!(out.connection.id, 2);
        assert_eq!(out.connection.name, "q_dev_connection");
    }

    #[test]
    fn any_policy_reuses_first_existing() {
        let reg = FakeRegistry::default();
        reg.connections.lock().push(conn(5, "someone_else"));
        reg.connections.lock().push(conn(6, "q_dev_connection"));
        let out = ensure_connection(&reg, &settings(), MatchPolicy::Any).unwrap();
        assert!(!out.created);
        assert_eq!(out.connection.id, 5);
    }

    #[test]
    fn reuse_does_not_require_credentials() {
        let reg = FakeRegistry::default();
        reg.connections.lock().push(conn(3, "q_dev_connection"));
        let out =
            ensure_connection(&reg, &ConnectionSettings::default(), MatchPolicy::Name).unwrap();
        assert_eq!(out.connection.id, 3);
    }

    #[test]
    fn missing_credentials_rejected_before_create() {
        let reg = FakeRegistry::default();
        let err = ensure_connection(&reg, &ConnectionSettings::default(), MatchPolicy::Name)
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(err.to_string().contains("access_key_id"));
        assert_eq!(*reg.creates.lock(), 0);
    }

    #[test]
    fn list_failure_propagates() {
        struct Down;
        impl ConnectionRegistry for Down {
            fn list_connections(&self) -> LakeResult<Vec<Connection>> {
                Err(LakeError::RemoteUnavailable("connection refused".into()))
            }
            fn create_connection(&self, _: &ConnectionRequest) -> LakeResult<Connection> {
                unreachable!("create must not run when listing fails")
            }
        }
        let err = ensure_connection(&Down, &settings(), MatchPolicy::Name).unwrap_err();
        assert!(matches!(err, LakeError::RemoteUnavailable(_)));
    }
}
