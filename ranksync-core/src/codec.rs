//! RolesText codec.
//!
//! A group list is stored as a single comma-delimited text field. No escaping
//! is performed: group names containing [`DELIMITER`] cannot be represented.
//!
//! ```text
//! ["admin", "vip"]  <->  "admin,vip"
//! []                <->  ""
//! ```

use crate::error::DecodeError;
use crate::types::GroupSet;

/// Separator between group names in RolesText.
pub const DELIMITER: char = ',';

/// Check that `name` survives an [`encode`] / [`decode`] round trip as a
/// single group.
pub fn validate_group(name: &str) -> Result<(), DecodeError> {
    if name.is_empty() {
        return Err(DecodeError::EmptyName);
    }
    if name.contains(DELIMITER) {
        return Err(DecodeError::ContainsDelimiter {
            name: name.to_string(),
        });
    }
    if name.chars().any(char::is_control) {
        return Err(DecodeError::ControlCharacter {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Join group names with [`DELIMITER`], preserving the given order.
pub fn encode<I, S>(groups: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, group) in groups.into_iter().enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        out.push_str(group.as_ref());
    }
    out
}

/// Split RolesText back into group names, in stored order.
///
/// The empty string decodes to an empty list. Any other text with an empty
/// segment (`"vip,,admin"`, `"vip,"`) or a control character is malformed.
pub fn decode(text: &str) -> Result<Vec<String>, DecodeError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut groups = Vec::new();
    for (position, segment) in text.split(DELIMITER).enumerate() {
        if segment.is_empty() {
            return Err(DecodeError::EmptySegment { position });
        }
        if segment.chars().any(char::is_control) {
            return Err(DecodeError::ControlCharacter {
                name: segment.to_string(),
            });
        }
        groups.push(segment.to_string());
    }
    Ok(groups)
}

/// [`decode`] straight into a [`GroupSet`]; duplicate names collapse.
pub fn decode_set(text: &str) -> Result<GroupSet, DecodeError> {
    decode(text).map(GroupSet::from_iter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_preserves_order() {
        assert_eq!(encode(["vip", "admin"]), "vip,admin");
    }

    #[test]
    fn encode_empty_is_empty_string() {
        assert_eq!(encode(Vec::<String>::new()), "");
    }

    #[test]
    fn decode_empty_is_empty_list() {
        assert!(decode("").expect("decode").is_empty());
    }

    #[test]
    fn decode_single_group() {
        assert_eq!(decode("default").expect("decode"), vec!["default"]);
    }

    #[test]
    fn decode_rejects_trailing_delimiter() {
        assert_eq!(
            decode("vip,").unwrap_err(),
            DecodeError::EmptySegment { position: 1 }
        );
    }

    #[test]
    fn decode_rejects_doubled_delimiter() {
        assert_eq!(
            decode("vip,,admin").unwrap_err(),
            DecodeError::EmptySegment { position: 1 }
        );
    }

    #[test]
    fn decode_rejects_control_characters() {
        let err = decode("vip,ad\nmin").unwrap_err();
        assert!(matches!(err, DecodeError::ControlCharacter { .. }));
    }

    #[test]
    fn validate_group_accepts_plain_names() {
        assert!(validate_group("vip").is_ok());
        assert!(validate_group("Server Admin").is_ok());
    }

    #[test]
    fn validate_group_rejects_unstorable_names() {
        assert_eq!(validate_group("").unwrap_err(), DecodeError::EmptyName);
        assert!(matches!(
            validate_group("a,b").unwrap_err(),
            DecodeError::ContainsDelimiter { .. }
        ));
        assert!(matches!(
            validate_group("ad\nmin").unwrap_err(),
            DecodeError::ControlCharacter { .. }
        ));
    }

    #[test]
    fn decode_set_collapses_duplicates() {
        let set = decode_set("vip,admin,vip").expect("decode");
        assert_eq!(set.len(), 2);
        assert!(set.contains("vip"));
        assert!(set.contains("admin"));
    }
}
