//! Operation payloads for the standard NETCONF RPCs
//!
//! Each function returns the operation element only; [`RpcRequest`] wraps it
//! in the `<rpc>` envelope once a message-id is assigned.
//!
//! [`RpcRequest`]: crate::messages::RpcRequest

use crate::datastore::Datastore;
use crate::error::{NetconfError, Result};
use crate::messages::{ReplyBody, RpcReply};
use crate::node::ConfigNode;

/// `<edit-config>` writing `payload` into `target`
///
/// The payload keeps whatever `operation` attributes it carries.
pub fn build_edit_config(target: Datastore, payload: ConfigNode) -> ConfigNode {
    ConfigNode::builder("edit-config")
        .child(ConfigNode::container("target", [target.to_node()]))
        .child(ConfigNode::container("config", [payload]))
        .build()
}

/// `<get>` with an optional subtree filter
pub fn build_get(filter: Option<&ConfigNode>) -> ConfigNode {
    let mut get = ConfigNode::builder("get");
    if let Some(filter) = filter {
        get = get.child(subtree_filter(filter));
    }
    get.build()
}

/// `<get-config>` from `source` with an optional subtree filter
pub fn build_get_config(source: Datastore, filter: Option<&ConfigNode>) -> ConfigNode {
    let mut get = ConfigNode::builder("get-config")
        .child(ConfigNode::container("source", [source.to_node()]));
    if let Some(filter) = filter {
        get = get.child(subtree_filter(filter));
    }
    get.build()
}

/// `<lock>` on `target`
pub fn build_lock(target: Datastore) -> ConfigNode {
    ConfigNode::container("lock", [ConfigNode::container("target", [target.to_node()])])
}

/// `<unlock>` on `target`
pub fn build_unlock(target: Datastore) -> ConfigNode {
    ConfigNode::container("unlock", [ConfigNode::container("target", [target.to_node()])])
}

/// `<commit>` of the candidate datastore
pub fn build_commit() -> ConfigNode {
    ConfigNode::empty("commit")
}

/// `<discard-changes>` reverting the candidate datastore
pub fn build_discard_changes() -> ConfigNode {
    ConfigNode::empty("discard-changes")
}

/// `<validate>` of `source`
pub fn build_validate(source: Datastore) -> ConfigNode {
    ConfigNode::container("validate", [ConfigNode::container("source", [source.to_node()])])
}

/// `<kill-session>` for another session
pub fn build_kill_session(session_id: u32) -> ConfigNode {
    ConfigNode::container("kill-session", [ConfigNode::leaf("session-id", session_id.to_string())])
}

fn subtree_filter(filter: &ConfigNode) -> ConfigNode {
    ConfigNode::builder("filter")
        .attribute("type", "subtree")
        .child(filter.clone())
        .build()
}

/// Require an `<ok/>` reply; any rpc-error fails the whole operation
pub fn parse_ok(reply: RpcReply) -> Result<()> {
    reply.into_result()?;
    Ok(())
}

/// Extract the `<data>` element of a get/get-config reply
pub fn parse_data(reply: RpcReply) -> Result<ConfigNode> {
    match reply.into_result()? {
        ReplyBody::Data(data) => Ok(data),
        ReplyBody::Ok => Ok(ConfigNode::empty("data")),
        ReplyBody::Errors(_) => Err(NetconfError::MalformedReply(
            "error reply passed through as success".into(),
        )),
    }
}
