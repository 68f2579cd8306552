//! Email template rendering
//!
//! Templates use {{placeholder}} substitution. Unknown placeholders are
//! left in place so a missing variable is visible in the outbox rather
//! than silently blanked.

/// Substitute {{key}} placeholders
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}

/// Invite email: new user invited to the platform
pub const INVITE_TEMPLATE: &str = "\
Hello {{name}},

You have been invited to Yiba Verified as {{role}}{{institution_line}}.

Follow this link to set your password and activate your account:

  {{accept_url}}

This invitation expires on {{expires_at}}. If you were not expecting it,
you can ignore this message.

Yiba Verified";

/// Subject line for invite mail
pub const INVITE_SUBJECT: &str = "Invitation to Yiba Verified";

/// Decision email: readiness or submission decided
pub const DECISION_TEMPLATE: &str = "\
Hello {{name}},

{{what}} for {{institution}} has been {{outcome}}.

{{comment_line}}
Sign in to Yiba Verified to view the full decision.

Yiba Verified";

/// Subject line for decision mail
pub const DECISION_SUBJECT: &str = "Yiba Verified: {{what}} {{outcome}}";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_all_occurrences() {
        let out = render("{{a}} and {{b}} and {{a}}", &[("a", "x"), ("b", "y")]);
        assert_eq!(out, "x and y and x");
    }

    #[test]
    fn test_unknown_placeholder_left_visible() {
        let out = render("hello {{missing}}", &[("other", "x")]);
        assert_eq!(out, "hello {{missing}}");
    }

    #[test]
    fn test_invite_template_renders() {
        let out = render(
            INVITE_TEMPLATE,
            &[
                ("name", "Thandi Mokoena"),
                ("role", "institution_admin"),
                ("institution_line", " at Ikhaya College"),
                ("accept_url", "https://yiba.example/accept?token=abc"),
                ("expires_at", "2026-08-15"),
            ],
        );
        assert!(out.contains("Thandi Mokoena"));
        assert!(out.contains("at Ikhaya College"));
        assert!(!out.contains("{{"));
    }
}
