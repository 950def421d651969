use authflow_core::authn::AuthenticatorType;

/// What [`sort_authenticators`] needs to know about an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sortable {
    pub authenticator_type: AuthenticatorType,
    pub is_default: bool,
}

/// Stable sort: default items first, then by position of their type in
/// `preferred`. Types missing from `preferred` keep their relative order at the end.
pub fn sort_authenticators<T>(
    preferred: &[AuthenticatorType],
    items: &mut [T],
    key: impl Fn(&T) -> Sortable,
) {
    items.sort_by_key(|item| {
        let sortable = key(item);
        if sortable.is_default {
            return 0;
        }
        preferred
            .iter()
            .position(|t| *t == sortable.authenticator_type)
            .map(|rank| rank + 1)
            .unwrap_or(preferred.len() + 1)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use AuthenticatorType::*;

    fn item(authenticator_type: AuthenticatorType, is_default: bool) -> Sortable {
        Sortable {
            authenticator_type,
            is_default,
        }
    }

    fn types(items: &[Sortable]) -> Vec<AuthenticatorType> {
        items.iter().map(|s| s.authenticator_type).collect()
    }

    #[test]
    fn test_preferred_order() {
        let mut items = vec![item(OobSms, false), item(Totp, false), item(Password, false)];
        sort_authenticators(&[Password, Totp, OobSms], &mut items, |s| *s);
        assert_eq!(types(&items), vec![Password, Totp, OobSms]);
    }

    #[test]
    fn test_default_goes_first() {
        let mut items = vec![item(Totp, false), item(OobSms, true)];
        sort_authenticators(&[Totp, OobSms], &mut items, |s| *s);
        assert_eq!(types(&items), vec![OobSms, Totp]);
    }

    #[test]
    fn test_non_preferred_keep_order_after_preferred() {
        let mut items = vec![item(OobEmail, false), item(OobSms, false), item(Totp, false)];
        sort_authenticators(&[Totp], &mut items, |s| *s);
        assert_eq!(types(&items), vec![Totp, OobEmail, OobSms]);
    }

    #[test]
    fn test_empty_preference_is_stable() {
        let mut items = vec![item(OobSms, false), item(Totp, false), item(OobEmail, true)];
        sort_authenticators(&[], &mut items, |s| *s);
        assert_eq!(types(&items), vec![OobEmail, OobSms, Totp]);
    }
}
