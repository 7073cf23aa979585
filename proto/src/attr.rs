use serde::{Deserialize, Serialize};

use crate::{
    id::AttrId,
    value::{AttrName, Namespace},
};

/// `(attribute_id, namespace, attribute_name)` — server-assigned, cached
/// locally by the Attribute Registry (spec §3.1).
///
/// The wire shape is `{id, forward-identity: [_, namespace, attr_name], ...}`
/// (spec §4.4.1); `forward_identity.0` is an opaque link id the client does
/// not interpret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrDescriptor {
    pub id: AttrId,
    #[serde(rename = "forward-identity")]
    pub forward_identity: (String, Namespace, AttrName),
}

impl AttrDescriptor {
    pub fn namespace(&self) -> &str { &self.forward_identity.1 }
    pub fn attr_name(&self) -> &str { &self.forward_identity.2 }
}
