use {
    parley_common::types::{DEFAULT_USER_IDENTIFIER, Participant},
    parley_config::IdentifyBy,
};

/// Derive the identifier used for greeting whitelist lookups.
///
/// Nickname mode prefers the saved remark name over the display nickname so
/// whitelists survive contacts renaming themselves.
pub fn identify_user(mode: IdentifyBy, sender: &Participant) -> String {
    let candidate: &str = match mode {
        IdentifyBy::Nickname => sender
            .remark_name
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(&sender.nickname),
        IdentifyBy::UserId => &sender.id,
    };
    if candidate.is_empty() {
        DEFAULT_USER_IDENTIFIER.to_string()
    } else {
        candidate.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(id: &str, nick: &str, remark: Option<&str>) -> Participant {
        Participant {
            id: id.into(),
            nickname: nick.into(),
            remark_name: remark.map(Into::into),
        }
    }

    #[test]
    fn nickname_prefers_remark() {
        let s = sender("wxid_1", "Ally", Some("Alice (work)"));
        assert_eq!(identify_user(IdentifyBy::Nickname, &s), "Alice (work)");
        let s = sender("wxid_1", "Ally", Some(""));
        assert_eq!(identify_user(IdentifyBy::Nickname, &s), "Ally");
    }

    #[test]
    fn user_id_mode() {
        let s = sender("wxid_1", "Ally", Some("Alice"));
        assert_eq!(identify_user(IdentifyBy::UserId, &s), "wxid_1");
    }

    #[test]
    fn missing_data_falls_back() {
        let s = sender("", "", None);
        assert_eq!(identify_user(IdentifyBy::Nickname, &s), "default");
        assert_eq!(identify_user(IdentifyBy::UserId, &s), "default");
    }
}
