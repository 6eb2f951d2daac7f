//! Key scheme for the offline cache.
//!
//! Identity records live under `ClassName_id`. Pin sets live in their own
//! namespace so a scan can tell the two families apart: the default
//! (unnamed) pin set under [`DEFAULT_PIN_KEY`], named pin sets under
//! [`PIN_KEY_PREFIX`] plus the user-visible name.

/// Key of the default (unnamed) pin set.
pub const DEFAULT_PIN_KEY: &str = "_default_pin";

/// Prefix of named pin set keys.
pub const PIN_KEY_PREFIX: &str = "_pin_";

/// The storage key for an identity: `ClassName_id`.
pub fn identity_key(class_name: &str, id: &str) -> String {
    format!("{class_name}_{id}")
}

/// The storage key for a pin set; `None` names the default set.
pub fn pin_set_key(pin_name: Option<&str>) -> String {
    match pin_name {
        Some(name) => format!("{PIN_KEY_PREFIX}{name}"),
        None => DEFAULT_PIN_KEY.to_string(),
    }
}

/// True if a storage key belongs to the pin-set family.
pub fn is_pin_set_key(key: &str) -> bool {
    key == DEFAULT_PIN_KEY || key.starts_with(PIN_KEY_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_keys() {
        assert_eq!(identity_key("Game", "abc"), "Game_abc");
        assert_eq!(identity_key("_User", "u1"), "_User_u1");
    }

    #[test]
    fn pin_set_keys() {
        assert_eq!(pin_set_key(None), "_default_pin");
        assert_eq!(pin_set_key(Some("favorites")), "_pin_favorites");
    }

    #[test]
    fn families_are_distinguishable() {
        assert!(is_pin_set_key("_default_pin"));
        assert!(is_pin_set_key("_pin_favorites"));
        assert!(!is_pin_set_key("Game_abc"));
        assert!(!is_pin_set_key("_User_u1"));
    }
}
