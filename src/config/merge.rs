//! Layering of YAML configuration documents.
//!
//! One rule set, applied recursively, for every place where a more specific
//! document is laid over a more general one:
//!
//! | base      | overlay   | result                                              |
//! |-----------|-----------|-----------------------------------------------------|
//! | mapping   | mapping   | keys merged recursively, overlay-only keys added    |
//! | sequence  | sequence  | base items in order, then overlay items not present |
//! | anything  | anything  | overlay replaces base (scalars, type mismatches)    |

use serde_yaml::Value;

/// Merge `overlay` into `base` in place.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (Value::Sequence(base_seq), Value::Sequence(overlay_seq)) => {
            for item in overlay_seq {
                if !base_seq.contains(&item) {
                    base_seq.push(item);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Set `path` (dot separated) inside `root` to `value`, creating
/// intermediate mappings as needed.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if !matches!(current, Value::Mapping(_)) {
            *current = Value::Mapping(serde_yaml::Mapping::new());
        }
        let Value::Mapping(map) = current else {
            return;
        };
        let key = Value::String(part.to_string());
        if parts.peek().is_none() {
            map.insert(key, value);
            return;
        }
        current = map
            .entry(key)
            .or_insert_with(|| Value::Mapping(serde_yaml::Mapping::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_lists_are_unioned_without_duplicates() {
        let mut base = yaml("phrases: [\"use code\", \"sponsored by\"]");
        merge_values(&mut base, yaml("phrases: [\"sponsored by\", \"promo code\"]"));
        assert_eq!(
            base,
            yaml("phrases: [\"use code\", \"sponsored by\", \"promo code\"]")
        );
    }

    #[test]
    fn test_mappings_merge_recursively() {
        let mut base = yaml("time_priors: {pre_roll_max_s: 90, post_roll_last_s: 120}");
        merge_values(&mut base, yaml("time_priors: {post_roll_last_s: 60}"));
        assert_eq!(
            base,
            yaml("time_priors: {pre_roll_max_s: 90, post_roll_last_s: 60}")
        );
    }

    #[test]
    fn test_scalars_and_mismatches_override() {
        let mut base = yaml("aggressiveness: conservative\nphrases: [a]");
        merge_values(&mut base, yaml("aggressiveness: aggressive\nphrases: b"));
        assert_eq!(base, yaml("aggressiveness: aggressive\nphrases: b"));
    }

    #[test]
    fn test_overlay_only_keys_are_added() {
        let mut base = yaml("phrases: [a]");
        merge_values(&mut base, yaml("backlog_strategy: newest_only"));
        assert_eq!(base, yaml("phrases: [a]\nbacklog_strategy: newest_only"));
    }

    #[test]
    fn test_set_path_creates_intermediate_mappings() {
        let mut root = yaml("encoding: {codec: mp3}");
        set_path(&mut root, "encoding.bitrate", Value::String("96k".into()));
        set_path(&mut root, "detector.padding_seconds", Value::Number(4.into()));
        assert_eq!(
            root,
            yaml("encoding: {codec: mp3, bitrate: 96k}\ndetector: {padding_seconds: 4}")
        );
    }
}
