//! High-level configuration operations
//!
//! `create`, `update` and `delete` each map to exactly one `<edit-config>`
//! (plus a `<commit>` when writing to the candidate datastore with
//! auto-commit). Device-reported errors are never downgraded: any rpc-error
//! fails the whole operation.

use tracing::{info, warn};

use crate::datastore::Datastore;
use crate::error::{NetconfError, Result};
use crate::hello::{VALIDATE, WRITABLE_RUNNING};
use crate::node::{ConfigNode, EditOperation};
use crate::request_builder::{
    build_commit, build_discard_changes, build_edit_config, build_get, build_get_config, build_lock,
    build_kill_session, build_unlock, build_validate, parse_data, parse_ok,
};
use crate::session::Session;

/// CRUD-style client over a [`Session`]
#[derive(Debug, Clone)]
pub struct ConfigClient {
    target: Option<Datastore>,
    auto_commit: bool,
}

impl Default for ConfigClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigClient {
    /// Client that picks its target from the device capabilities:
    /// running when writable, otherwise candidate followed by commit
    pub fn new() -> Self {
        Self {
            target: None,
            auto_commit: true,
        }
    }

    /// Always write to `target`
    pub fn with_target(mut self, target: Datastore) -> Self {
        self.target = Some(target);
        self
    }

    /// Commit after every successful edit of the candidate datastore (default on)
    pub fn auto_commit(mut self, enabled: bool) -> Self {
        self.auto_commit = enabled;
        self
    }

    /// Merge `config` into the target datastore
    pub async fn create(&self, session: &Session, config: &ConfigNode) -> Result<()> {
        self.edit(session, config, EditOperation::Merge).await
    }

    /// Replace the subtree rooted at `config`
    pub async fn update(&self, session: &Session, config: &ConfigNode) -> Result<()> {
        self.edit(session, config, EditOperation::Replace).await
    }

    /// Delete the subtree identified by `config`
    pub async fn delete(&self, session: &Session, config: &ConfigNode) -> Result<()> {
        self.edit(session, config, EditOperation::Delete).await
    }

    /// Apply `config` with `operation` on its root.
    ///
    /// An `operation` attribute already set on the root wins; attributes on
    /// nested nodes are always left alone.
    pub async fn edit(&self, session: &Session, config: &ConfigNode, operation: EditOperation) -> Result<()> {
        require_namespace(config)?;
        let target = self.resolve_target(session)?;

        let payload = match config.operation() {
            Some(_) => config.clone(),
            None => config.clone().with_operation(operation),
        };
        info!(%target, %operation, root = config.name(), "edit-config");
        let edited = session
            .rpc(build_edit_config(target, payload))
            .await
            .and_then(parse_ok);

        if target != Datastore::Candidate || !self.auto_commit {
            return edited;
        }
        // Leave nothing half-applied in the candidate for the next commit
        let outcome = match edited {
            Ok(()) => self.commit(session).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            if let Err(discard) = self.discard_changes(session).await {
                warn!(error = %discard, "discard-changes after failed edit also failed");
            }
            return Err(e);
        }
        Ok(())
    }

    /// `<get>` with `filter` as subtree filter; returns the `<data>` element
    pub async fn get(&self, session: &Session, filter: &ConfigNode) -> Result<ConfigNode> {
        require_namespace(filter)?;
        parse_data(session.rpc(build_get(Some(filter))).await?)
    }

    /// `<get-config>` from `source`; returns the `<data>` element
    pub async fn get_config(
        &self,
        session: &Session,
        source: Datastore,
        filter: Option<&ConfigNode>,
    ) -> Result<ConfigNode> {
        if let Some(filter) = filter {
            require_namespace(filter)?;
        }
        require_read(session, source)?;
        parse_data(session.rpc(build_get_config(source, filter)).await?)
    }

    /// Lock `target` against edits from other sessions
    pub async fn lock(&self, session: &Session, target: Datastore) -> Result<()> {
        require_read(session, target)?;
        parse_ok(session.rpc(build_lock(target)).await?)
    }

    /// Release a lock taken with [`ConfigClient::lock`]
    pub async fn unlock(&self, session: &Session, target: Datastore) -> Result<()> {
        require_read(session, target)?;
        parse_ok(session.rpc(build_unlock(target)).await?)
    }

    /// Commit the candidate datastore into running
    pub async fn commit(&self, session: &Session) -> Result<()> {
        require_read(session, Datastore::Candidate)?;
        info!("commit");
        parse_ok(session.rpc(build_commit()).await?)
    }

    /// Revert the candidate datastore to the running configuration
    pub async fn discard_changes(&self, session: &Session) -> Result<()> {
        require_read(session, Datastore::Candidate)?;
        parse_ok(session.rpc(build_discard_changes()).await?)
    }

    /// Ask the device to validate the contents of `source`
    pub async fn validate(&self, session: &Session, source: Datastore) -> Result<()> {
        if !session.capabilities().supports_any_version(VALIDATE) {
            return Err(NetconfError::Unsupported(VALIDATE.to_string()));
        }
        require_read(session, source)?;
        parse_ok(session.rpc(build_validate(source)).await?)
    }

    /// Force the device to terminate another session, releasing its locks
    pub async fn kill_session(&self, session: &Session, session_id: u32) -> Result<()> {
        if session.session_id() == Some(session_id) {
            return Err(NetconfError::Unsupported("kill-session on the current session".into()));
        }
        parse_ok(session.rpc(build_kill_session(session_id)).await?)
    }

    fn resolve_target(&self, session: &Session) -> Result<Datastore> {
        match self.target {
            Some(target) if session.supports(target.write_capability()) => Ok(target),
            Some(target) => Err(NetconfError::Unsupported(target.write_capability().to_string())),
            None if session.supports(WRITABLE_RUNNING) => Ok(Datastore::Running),
            None if session.supports(Datastore::Candidate.write_capability()) => Ok(Datastore::Candidate),
            None => Err(NetconfError::Unsupported(format!(
                "{} or {}",
                WRITABLE_RUNNING,
                Datastore::Candidate.write_capability()
            ))),
        }
    }
}

fn require_read(session: &Session, datastore: Datastore) -> Result<()> {
    match datastore.read_capability() {
        Some(capability) if !session.supports(capability) => {
            Err(NetconfError::Unsupported(capability.to_string()))
        }
        _ => Ok(()),
    }
}

/// Payload roots must declare the namespace of their YANG module
fn require_namespace(node: &ConfigNode) -> Result<()> {
    let declared = match node.name().split_once(':') {
        Some((prefix, _)) => node.attribute(&format!("xmlns:{}", prefix)).is_some(),
        None => node.namespace().is_some(),
    };
    if declared {
        Ok(())
    } else {
        Err(NetconfError::InvalidNode(format!(
            "<{}> does not declare its module namespace",
            node.name()
        )))
    }
}
