//! Pure field rules for identity resolution
//!
//! Everything here is free of I/O: the identity service loads users, asks
//! these functions what the result should look like, and hands the result to
//! the store in a single write. The central rule is "keep non-empty, else
//! fill": a later provider never overwrites a value an earlier one supplied.

use chrono::{DateTime, Utc};

use super::user::User;
use crate::oauth2::{OAuthProvider, ProviderProfile};

/// Provider access token after sealing, ready to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedToken {
    /// Ciphertext produced by the token cipher
    pub ciphertext: String,
    /// Provider-reported expiry
    pub expires_at: Option<DateTime<Utc>>,
}

/// Normalize an email address: trimmed and lower-cased, `None` when empty
#[must_use]
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    (!email.is_empty()).then_some(email)
}

/// Union addresses into an email set
///
/// The set stays normalized, sorted and free of duplicates.
pub fn union_emails<'a>(set: &mut Vec<String>, extra: impl IntoIterator<Item = &'a str>) {
    set.extend(extra.into_iter().filter_map(normalize_email));
    for email in set.iter_mut() {
        *email = email.trim().to_lowercase();
    }
    set.retain(|e| !e.is_empty());
    set.sort();
    set.dedup();
}

/// Copy `source` into `target` only when `target` is unset
///
/// Returns whether `target` changed.
pub fn fill_if_empty(target: &mut String, source: &str) -> bool {
    if target.is_empty() && !source.is_empty() {
        source.clone_into(target);
        true
    } else {
        false
    }
}

fn set_token(user: &mut User, provider: OAuthProvider, token: Option<SealedToken>) {
    let (ciphertext, expires_at) = match token {
        Some(t) => (Some(t.ciphertext), t.expires_at),
        None => return,
    };
    match provider {
        OAuthProvider::GitHub => {
            user.github_access_token = ciphertext;
            user.github_token_expires_at = expires_at;
        }
        OAuthProvider::Google => {
            user.google_access_token = ciphertext;
            user.google_token_expires_at = expires_at;
        }
    }
}

/// Refresh an existing user from a fresh-authentication profile
///
/// Display fields are filled only when empty, the profile email joins the
/// email set and the provider token is replaced by the newest one.
pub fn refresh_from_profile(
    user: &mut User,
    profile: &ProviderProfile,
    token: Option<SealedToken>,
    now: DateTime<Utc>,
) {
    match profile.provider {
        OAuthProvider::GitHub => {
            fill_if_empty(&mut user.github_username, &profile.username);
        }
        OAuthProvider::Google => {
            if let Some(email) = normalize_email(&profile.email) {
                fill_if_empty(&mut user.google_email, &email);
            }
        }
    }
    if let Some(email) = normalize_email(&profile.email) {
        fill_if_empty(&mut user.email, &email);
    }
    fill_if_empty(&mut user.name, &profile.name);
    fill_if_empty(&mut user.avatar_url, &profile.avatar_url);
    union_emails(&mut user.emails, [profile.email.as_str()]);
    set_token(user, profile.provider, token);
    user.updated_at = now;
}

/// Attach a provider account to a user
///
/// The caller has already established that the provider id is free or
/// belongs to this user; the store re-checks at write time.
pub fn attach_profile(
    user: &mut User,
    profile: &ProviderProfile,
    token: Option<SealedToken>,
    now: DateTime<Utc>,
) {
    let id = Some(profile.provider_user_id.clone());
    match profile.provider {
        OAuthProvider::GitHub => user.github_id = id,
        OAuthProvider::Google => user.google_id = id,
    }
    refresh_from_profile(user, profile, token, now);
}

/// Build a brand-new user from a provider profile
#[must_use]
pub fn user_from_profile(
    profile: &ProviderProfile,
    token: Option<SealedToken>,
    now: DateTime<Utc>,
) -> User {
    let mut user = User::new(now);
    attach_profile(&mut user, profile, token, now);
    user
}

/// Mergeable fields captured from the absorbed user before it is deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSnapshot {
    github_id: Option<String>,
    github_username: String,
    github_access_token: Option<String>,
    github_token_expires_at: Option<DateTime<Utc>>,
    google_id: Option<String>,
    google_email: String,
    google_access_token: Option<String>,
    google_token_expires_at: Option<DateTime<Utc>>,
    email: String,
    emails: Vec<String>,
    name: String,
    avatar_url: String,
}

impl MergeSnapshot {
    /// Capture the mergeable fields of `user`
    #[must_use]
    pub fn capture(user: &User) -> Self {
        Self {
            github_id: user.github_id.clone(),
            github_username: user.github_username.clone(),
            github_access_token: user.github_access_token.clone(),
            github_token_expires_at: user.github_token_expires_at,
            google_id: user.google_id.clone(),
            google_email: user.google_email.clone(),
            google_access_token: user.google_access_token.clone(),
            google_token_expires_at: user.google_token_expires_at,
            email: user.email.clone(),
            emails: user.emails.clone(),
            name: user.name.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }

    /// Apply the snapshot onto the surviving user
    ///
    /// Provider ids travel as a unit with their username/email and sealed
    /// token, and only when the survivor holds no id for that provider.
    pub fn apply_to(self, primary: &mut User, now: DateTime<Utc>) {
        if primary.github_id.is_none() && self.github_id.is_some() {
            primary.github_id = self.github_id;
            primary.github_username = self.github_username;
            primary.github_access_token = self.github_access_token;
            primary.github_token_expires_at = self.github_token_expires_at;
        }
        if primary.google_id.is_none() && self.google_id.is_some() {
            primary.google_id = self.google_id;
            primary.google_email = self.google_email;
            primary.google_access_token = self.google_access_token;
            primary.google_token_expires_at = self.google_token_expires_at;
        }
        fill_if_empty(&mut primary.email, &self.email);
        fill_if_empty(&mut primary.name, &self.name);
        fill_if_empty(&mut primary.avatar_url, &self.avatar_url);
        union_emails(&mut primary.emails, self.emails.iter().map(String::as_str));
        primary.updated_at = now;
    }
}

/// Outcome of planning a merge: who survives and who is absorbed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// Surviving user with the absorbed user's fields applied
    pub survivor: User,
    /// The user to delete, as it was loaded
    pub absorbed: User,
}

/// Whether `a` outranks `b` as merge survivor
///
/// The older account wins; equal timestamps fall back to the smaller id so
/// the choice never depends on argument order.
#[must_use]
pub fn survives_over(a: &User, b: &User) -> bool {
    (a.created_at, a.id) < (b.created_at, b.id)
}

/// Plan the merge of two users, independent of which side initiated it
#[must_use]
pub fn plan_merge(a: User, b: User, now: DateTime<Utc>) -> MergePlan {
    let (mut survivor, absorbed) = if survives_over(&a, &b) { (a, b) } else { (b, a) };
    MergeSnapshot::capture(&absorbed).apply_to(&mut survivor, now);
    MergePlan { survivor, absorbed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn github_user(id: &str, email: &str, created_at: DateTime<Utc>) -> User {
        let profile = ProviderProfile::new(OAuthProvider::GitHub, id)
            .with_email(email)
            .with_username(format!("gh-{id}"))
            .with_name("GitHub Name");
        user_from_profile(&profile, None, created_at)
    }

    fn google_user(id: &str, email: &str, created_at: DateTime<Utc>) -> User {
        let profile = ProviderProfile::new(OAuthProvider::Google, id)
            .with_email(email)
            .with_avatar("https://example.com/g.png");
        user_from_profile(&profile, None, created_at)
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  A@X.com "), Some("a@x.com".to_string()));
        assert_eq!(normalize_email("   "), None);
    }

    #[test]
    fn test_fill_if_empty_keeps_existing() {
        let mut target = "kept".to_string();
        assert!(!fill_if_empty(&mut target, "new"));
        assert_eq!(target, "kept");

        let mut empty = String::new();
        assert!(fill_if_empty(&mut empty, "new"));
        assert_eq!(empty, "new");
        assert!(!fill_if_empty(&mut empty, ""));
    }

    #[test]
    fn test_union_emails_dedups_case_insensitively() {
        let mut set = vec!["a@x.com".to_string()];
        union_emails(&mut set, ["A@X.COM", "b@x.com", ""]);
        assert_eq!(set, vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_user_from_profile_github() {
        let now = Utc::now();
        let user = github_user("1", "A@x.com", now);

        assert_eq!(user.github_id.as_deref(), Some("1"));
        assert_eq!(user.github_username, "gh-1");
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.emails, vec!["a@x.com"]);
        assert_eq!(user.name, "GitHub Name");
        assert!(user.google_id.is_none());
    }

    #[test]
    fn test_refresh_does_not_overwrite_display_fields() {
        let now = Utc::now();
        let mut user = github_user("1", "a@x.com", now);
        let profile = ProviderProfile::new(OAuthProvider::GitHub, "1")
            .with_email("other@x.com")
            .with_name("Renamed")
            .with_avatar("https://example.com/new.png");
        let token = SealedToken {
            ciphertext: "sealed".to_string(),
            expires_at: None,
        };

        refresh_from_profile(&mut user, &profile, Some(token), now);

        assert_eq!(user.name, "GitHub Name");
        assert_eq!(user.avatar_url, "https://example.com/new.png");
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.emails, vec!["a@x.com", "other@x.com"]);
        assert_eq!(user.github_access_token.as_deref(), Some("sealed"));
    }

    #[test]
    fn test_older_user_survives() {
        let now = Utc::now();
        let older = google_user("77", "b@x.com", now - Duration::days(3));
        let newer = github_user("1", "a@x.com", now);
        let older_id = older.id;
        let newer_id = newer.id;

        let plan = plan_merge(newer, older, now);

        assert_eq!(plan.survivor.id, older_id);
        assert_eq!(plan.absorbed.id, newer_id);
        assert_eq!(plan.survivor.github_id.as_deref(), Some("1"));
        assert_eq!(plan.survivor.github_username, "gh-1");
        assert_eq!(plan.survivor.google_id.as_deref(), Some("77"));
        assert_eq!(plan.survivor.emails, vec!["a@x.com", "b@x.com"]);
        assert_eq!(plan.survivor.email, "b@x.com");
        assert_eq!(plan.survivor.name, "GitHub Name");
        assert_eq!(plan.survivor.avatar_url, "https://example.com/g.png");
    }

    #[test]
    fn test_survivor_keeps_its_own_provider_pair() {
        let now = Utc::now();
        let older = github_user("1", "a@x.com", now - Duration::days(1));
        let newer = github_user("2", "c@x.com", now);

        let plan = plan_merge(older.clone(), newer, now);

        assert_eq!(plan.survivor.github_id.as_deref(), Some("1"));
        assert_eq!(plan.survivor.github_username, "gh-1");
        assert_eq!(plan.survivor.emails, vec!["a@x.com", "c@x.com"]);
    }

    #[test]
    fn test_equal_timestamps_tie_break_on_id() {
        let now = Utc::now();
        let a = github_user("1", "a@x.com", now);
        let b = google_user("2", "b@x.com", now);
        let expected = a.id.min(b.id);

        assert_eq!(plan_merge(a.clone(), b.clone(), now).survivor.id, expected);
        assert_eq!(plan_merge(b, a, now).survivor.id, expected);
    }

    fn arb_user() -> impl Strategy<Value = User> {
        (
            proptest::option::of("[0-9]{1,4}"),
            proptest::option::of("[0-9]{1,4}"),
            proptest::collection::vec("[a-c]{1,2}@[xX]\\.com", 0..4),
            "[a-z]{0,3}",
            0i64..5,
        )
            .prop_map(|(gh, goog, emails, name, age)| {
                let mut user = User::new(Utc::now() - Duration::days(age));
                user.github_id = gh;
                user.google_id = goog;
                union_emails(&mut user.emails, emails.iter().map(String::as_str));
                user.name = name;
                user
            })
    }

    proptest! {
        #[test]
        fn prop_merge_is_symmetric(a in arb_user(), b in arb_user()) {
            let now = Utc::now();
            let left = plan_merge(a.clone(), b.clone(), now);
            let right = plan_merge(b, a, now);
            prop_assert_eq!(left, right);
        }

        #[test]
        fn prop_merged_emails_are_the_union(a in arb_user(), b in arb_user()) {
            let mut expected = a.emails.clone();
            union_emails(&mut expected, b.emails.iter().map(String::as_str));

            let plan = plan_merge(a, b, Utc::now());
            prop_assert_eq!(plan.survivor.emails, expected);
        }
    }
}
