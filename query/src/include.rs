//! Relation-name conventions for `include` expansion (spec §4.3).
//!
//! These are intentionally hard-coded string rules, not configurable — the
//! spec calls them out explicitly as conventions that "must be preserved".

/// Naive English singularization: strip a trailing `s` if present.
fn singularize(namespace: &str) -> &str { namespace.strip_suffix('s').unwrap_or(namespace) }

/// Foreign key on the child entity for a plural (one-to-many) relation.
pub fn foreign_key_for_many(relation: &str, parent_namespace: &str) -> String {
    if relation == "posts" {
        "authorId".to_string()
    } else {
        format!("{}Id", singularize(parent_namespace))
    }
}

/// Foreign key on the parent entity for a singular (one-to-one) relation.
pub fn parent_foreign_key_for_one(relation: &str) -> String { format!("{relation}Id") }

/// Target namespace for a singular relation lookup.
pub fn target_namespace_for_one(relation: &str) -> String {
    match relation {
        "author" | "user" => "users".to_string(),
        other => format!("{other}s"),
    }
}

/// A relation key is treated as one-to-many ("plural") when its name ends
/// in `s`; otherwise one-to-one.
pub fn is_plural(relation: &str) -> bool { relation.ends_with('s') }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plural_posts_uses_author_id() {
        assert_eq!(foreign_key_for_many("posts", "users"), "authorId");
    }

    #[test]
    fn plural_other_uses_singular_parent_id() {
        assert_eq!(foreign_key_for_many("comments", "posts"), "postId");
    }

    #[test]
    fn singular_author_and_user_map_to_users() {
        assert_eq!(target_namespace_for_one("author"), "users");
        assert_eq!(target_namespace_for_one("user"), "users");
        assert_eq!(target_namespace_for_one("category"), "categorys");
    }
}
