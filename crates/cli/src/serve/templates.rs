//! Server-rendered HTML for the chat UI.
//!
//! Page skeletons live under `templates/` and are embedded at compile time;
//! the dynamic parts are built here. Everything that came from a user or
//! the model goes through [`html_escape`].

use kbchat_chat::{ChatMessage, ChatSession, FeedbackCategory, Role, SidebarSection};

const LOGIN_TEMPLATE: &str = include_str!("templates/login.html");
const CHAT_TEMPLATE: &str = include_str!("templates/chat.html");
const STYLES: &str = include_str!("templates/styles.css");

/// Render the login page.
pub fn render_login(title: &str, failed: bool) -> String {
    let error = if failed {
        r#"<p class="error">Invalid username or password</p>"#
    } else {
        ""
    };

    let title = html_escape(title);
    fill(
        LOGIN_TEMPLATE,
        &[
            ("TITLE", title.as_str()),
            ("STYLES", STYLES),
            ("ERROR", error),
        ],
    )
}

/// Render the chat page for one session.
pub fn render_chat(
    title: &str,
    session: &ChatSession,
    sections: &[SidebarSection],
    notice: Option<&str>,
    link_expiry_secs: u64,
) -> String {
    let notice = notice
        .map(|n| format!(r#"<p class="notice">{}</p>"#, html_escape(n)))
        .unwrap_or_default();

    let title = html_escape(title);
    let sidebar = render_sidebar(sections);
    let messages = render_messages(session, &expiry_label(link_expiry_secs));

    fill(
        CHAT_TEMPLATE,
        &[
            ("TITLE", title.as_str()),
            ("STYLES", STYLES),
            ("SIDEBAR", sidebar.as_str()),
            ("NOTICE", notice.as_str()),
            ("MESSAGES", messages.as_str()),
        ],
    )
}

/// Substitute `{{KEY}}` placeholders in one pass, so inserted text is never
/// scanned for placeholders itself.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };

        let key = &after[..end];
        match values.iter().find(|(k, _)| *k == key) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

// =============================================================================
// Sidebar
// =============================================================================

fn render_sidebar(sections: &[SidebarSection]) -> String {
    if sections.is_empty() {
        return r#"<p class="empty">No chat history available</p>"#.to_string();
    }

    let mut html = String::new();
    for section in sections {
        html.push_str(&format!("<details><summary>{}</summary>", section.label));

        let mut current_date: Option<&str> = None;
        for entry in &section.entries {
            if current_date != Some(entry.date.as_str()) {
                html.push_str(&format!(
                    r#"<div class="date">{}</div>"#,
                    html_escape(&entry.date)
                ));
                current_date = Some(entry.date.as_str());
            }

            let id = html_escape(&entry.conversation_id);
            html.push_str(&format!(
                concat!(
                    r#"<div class="conversation">"#,
                    r#"<form method="post" action="/conversations/{id}/load"><button type="submit">{title}</button></form>"#,
                    r#"<form method="post" action="/conversations/{id}/delete"><button type="submit" title="Delete conversation">🗑</button></form>"#,
                    "</div>"
                ),
                id = id,
                title = html_escape(&entry.title),
            ));
        }

        html.push_str("</details>");
    }
    html
}

// =============================================================================
// Messages
// =============================================================================

fn render_messages(session: &ChatSession, link_expiry: &str) -> String {
    session
        .messages
        .iter()
        .enumerate()
        .map(|(idx, message)| render_message(session, idx, message, link_expiry))
        .collect()
}

/// Human form of a link lifetime: "1 hour", "90 minutes", "45 seconds".
fn expiry_label(secs: u64) -> String {
    let (n, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };

    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

fn render_message(
    session: &ChatSession,
    idx: usize,
    message: &ChatMessage,
    link_expiry: &str,
) -> String {
    let role = message.role.as_str();
    let mut html = format!(
        r#"<div class="message {role}"><div class="role">{role}</div><div class="content">{}</div>"#,
        render_text(&message.content),
        role = role,
    );

    if !message.references.is_empty() {
        html.push_str(&render_references(session, idx, message, link_expiry));
    }

    if message.role == Role::Assistant {
        html.push_str(&render_feedback(session, idx));
    }

    html.push_str("</div>");
    html
}

fn render_references(
    session: &ChatSession,
    idx: usize,
    message: &ChatMessage,
    link_expiry: &str,
) -> String {
    let selected = session.selected_reference(idx);

    let mut html = String::from(
        r#"<details class="references" open><summary>📚 References</summary><div class="pager">"#,
    );
    for i in 0..message.references.len() {
        let class = if i == selected { r#" class="selected""# } else { "" };
        html.push_str(&format!(
            r#"<form method="post" action="/messages/{idx}/references/{i}"><button type="submit"{class} title="View Reference {n} details">Reference {n}</button></form>"#,
            idx = idx,
            i = i,
            class = class,
            n = i + 1,
        ));
    }
    html.push_str("</div>");

    if let Some(reference) = message.references.get(selected) {
        html.push_str(r#"<div class="reference-detail">"#);
        html.push_str(&format!(
            "<p><strong>Source:</strong> {}</p>",
            html_escape(&reference.uri)
        ));
        html.push_str(&format!(
            "<p><strong>Excerpt:</strong> {}</p>",
            render_text(&reference.snippet)
        ));
        if let Some(url) = &reference.presigned_url {
            html.push_str(&format!(
                r#"<p><a href="{}" target="_blank" rel="noopener">View Source Document</a></p><p class="note">Note: Source document link expires in {}</p>"#,
                html_escape(url),
                link_expiry
            ));
        }
        html.push_str("</div>");
    }

    html.push_str("</details>");
    html
}

fn render_feedback(session: &ChatSession, idx: usize) -> String {
    let mut html = String::new();

    if session.vote(idx).is_none() {
        html.push_str(&format!(
            concat!(
                r#"<div class="feedback">"#,
                r#"<form method="post" action="/messages/{idx}/vote/up"><button type="submit" title="Helpful">👍</button></form>"#,
                r#"<form method="post" action="/messages/{idx}/vote/down"><button type="submit" title="Not helpful">👎</button></form>"#,
                "</div>"
            ),
            idx = idx
        ));
    }

    if session.is_feedback_open(idx) {
        html.push_str(&format!(
            r#"<form class="feedback-form" method="post" action="/messages/{}/feedback"><strong>What went wrong?</strong>"#,
            idx
        ));
        for category in FeedbackCategory::ALL {
            html.push_str(&format!(
                r#"<label><input type="checkbox" name="category" value="{label}"> {label}</label>"#,
                label = html_escape(category.label())
            ));
        }
        html.push_str(&format!(
            concat!(
                r#"<textarea name="correction" placeholder="Please provide the correct answer or additional details (optional)"></textarea>"#,
                r#"<div class="feedback"><button type="submit" class="primary">Submit</button>"#,
                r#"<button type="submit" formaction="/messages/{idx}/feedback/cancel">Cancel</button></div>"#,
                "</form>"
            ),
            idx = idx
        ));
    }

    html
}

/// Escape text and keep its line breaks.
fn render_text(text: &str) -> String {
    html_escape(text).replace('\n', "<br>")
}

/// Escape HTML special characters to prevent XSS.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbchat_chat::SidebarEntry;
    use kbchat_knowledge::Reference;

    fn session_with_answer() -> ChatSession {
        let mut session = ChatSession::new("user_1");
        session.push(ChatMessage::user("<b>hi</b>"));

        let mut first = Reference::new("s3://kb/a.pdf", "line one\nline two", 0.9);
        first.presigned_url = Some("https://signed/a?x=1&y=2".to_string());
        let second = Reference::new("s3://kb/b.pdf", "other", 0.5);
        session.push(ChatMessage::assistant("Answer", vec![first, second]));
        session
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_fill_is_single_pass() {
        assert_eq!(
            fill("<{{A}}|{{B}}|{{C}}>", &[("A", "{{B}}"), ("B", "b")]),
            "<{{B}}|b|{{C}}>"
        );
        assert_eq!(fill("open {{A", &[("A", "x")]), "open {{A");
    }

    #[test]
    fn test_login_page() {
        let page = render_login("KB <Chat>", true);
        assert!(page.contains("<title>KB &lt;Chat&gt;</title>"));
        assert!(page.contains("Invalid username or password"));
        assert!(!render_login("KB", false).contains("Invalid username"));
    }

    #[test]
    fn test_chat_page_escapes_and_pages_references() {
        let mut session = session_with_answer();
        session.select_reference(1, 1);

        let page = render_chat("KB", &session, &[], Some("Saved"), 3600);
        assert!(page.contains("&lt;b&gt;hi&lt;/b&gt;"));
        assert!(!page.contains("<b>hi</b>"));
        assert!(page.contains(r#"<p class="notice">Saved</p>"#));
        assert!(page.contains("Reference 1"));
        assert!(page.contains(r#"<button type="submit" class="selected" title="View Reference 2 details">Reference 2</button>"#));
        assert!(page.contains("s3://kb/b.pdf"));
        assert!(!page.contains("View Source Document"));
        assert!(page.contains("No chat history available"));
    }

    #[test]
    fn test_reference_detail_with_link() {
        let page = render_chat("KB", &session_with_answer(), &[], None, 3600);
        assert!(page.contains("line one<br>line two"));
        assert!(page.contains(r#"href="https://signed/a?x=1&amp;y=2""#));
        assert!(page.contains("expires in 1 hour"));

        let page = render_chat("KB", &session_with_answer(), &[], None, 900);
        assert!(page.contains("Source document link expires in 15 minutes"));
        assert!(!page.contains("1 hour"));
    }

    #[test]
    fn test_expiry_label() {
        assert_eq!(expiry_label(3600), "1 hour");
        assert_eq!(expiry_label(7200), "2 hours");
        assert_eq!(expiry_label(5400), "90 minutes");
        assert_eq!(expiry_label(60), "1 minute");
        assert_eq!(expiry_label(45), "45 seconds");
        assert_eq!(expiry_label(3601), "3601 seconds");
    }

    #[test]
    fn test_feedback_controls() {
        let session = session_with_answer();
        let page = render_chat("KB", &session, &[], None, 3600);
        assert!(page.contains("/messages/1/vote/up"));
        assert!(!page.contains("/messages/0/vote/up"));
        assert!(!page.contains("feedback-form"));
    }

    #[test]
    fn test_sidebar_groups_by_date() {
        let sections = vec![SidebarSection {
            label: "Previous 7 days",
            entries: vec![
                SidebarEntry {
                    conversation_id: "300".to_string(),
                    title: "Third".to_string(),
                    date: "2024-05-08".to_string(),
                },
                SidebarEntry {
                    conversation_id: "200".to_string(),
                    title: "Second".to_string(),
                    date: "2024-05-08".to_string(),
                },
                SidebarEntry {
                    conversation_id: "100".to_string(),
                    title: "First".to_string(),
                    date: "2024-05-06".to_string(),
                },
            ],
        }];

        let html = render_sidebar(&sections);
        assert!(html.starts_with("<details><summary>Previous 7 days</summary>"));
        assert_eq!(html.matches(r#"<div class="date">2024-05-08</div>"#).count(), 1);
        assert_eq!(html.matches(r#"class="date""#).count(), 2);
        assert!(html.contains("/conversations/300/load"));
        assert!(html.contains("/conversations/100/delete"));
    }
}
