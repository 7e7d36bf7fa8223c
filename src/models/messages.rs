//! Outgoing chat messages and their configurable templates.

use serde::{Deserialize, Serialize};

use crate::models::{Listing, Query};

/// A rendered message with an HTML body and a plain-text fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub html: String,
    pub plain: String,
}

impl Message {
    /// Build a message from HTML, deriving the plain text by stripping tags.
    pub fn from_html(html: impl Into<String>) -> Self {
        let html = html.into();
        let plain = strip_tags(&html);
        Self { html, plain }
    }
}

/// Message templates. Placeholders are written as `{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Messages {
    /// New listing, HTML (`{title}`, `{price}`, `{link}`, `{location}`, `{term}`, `{query_id}`)
    #[serde(default = "defaults::listing_html")]
    pub listing_html: String,

    /// New listing, plain text fallback
    #[serde(default = "defaults::listing_plain")]
    pub listing_plain: String,

    /// First failed poll of a query
    #[serde(default = "defaults::fetch_warning")]
    pub fetch_warning: String,

    /// Second consecutive failed poll, query deleted
    #[serde(default = "defaults::query_removed")]
    pub query_removed: String,

    #[serde(default = "defaults::query_added")]
    pub query_added: String,

    #[serde(default = "defaults::query_deleted")]
    pub query_deleted: String,

    #[serde(default = "defaults::query_not_found")]
    pub query_not_found: String,

    #[serde(default = "defaults::query_summary")]
    pub query_summary: String,

    #[serde(default = "defaults::no_queries")]
    pub no_queries: String,

    #[serde(default = "defaults::add_usage")]
    pub add_usage: String,

    #[serde(default = "defaults::add_failed")]
    pub add_failed: String,

    #[serde(default = "defaults::remove_usage")]
    pub remove_usage: String,

    #[serde(default = "defaults::invalid_id")]
    pub invalid_id: String,

    #[serde(default = "defaults::unknown_command")]
    pub unknown_command: String,

    #[serde(default = "defaults::help")]
    pub help: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            listing_html: defaults::listing_html(),
            listing_plain: defaults::listing_plain(),
            fetch_warning: defaults::fetch_warning(),
            query_removed: defaults::query_removed(),
            query_added: defaults::query_added(),
            query_deleted: defaults::query_deleted(),
            query_not_found: defaults::query_not_found(),
            query_summary: defaults::query_summary(),
            no_queries: defaults::no_queries(),
            add_usage: defaults::add_usage(),
            add_failed: defaults::add_failed(),
            remove_usage: defaults::remove_usage(),
            invalid_id: defaults::invalid_id(),
            unknown_command: defaults::unknown_command(),
            help: defaults::help(),
        }
    }
}

impl Messages {
    /// Notification for a newly found listing.
    ///
    /// `{location}` is the listing's location here, not the query's.
    pub fn new_listing(&self, listing: &Listing, query: &Query) -> Message {
        let html = fill(&self.listing_html, &listing_values(listing, query, true));
        let plain = fill(&self.listing_plain, &listing_values(listing, query, false));
        Message { html, plain }
    }

    /// Warning sent after the first failed poll.
    pub fn fetch_warning(&self, query: &Query) -> Message {
        Message::from_html(with_query(&self.fetch_warning, query, true))
    }

    /// Notice sent when a query is deleted after repeated failures.
    pub fn query_removed(&self, query: &Query) -> Message {
        Message::from_html(with_query(&self.query_removed, query, true))
    }

    pub fn query_added(&self, query: &Query) -> Message {
        Message::from_html(with_query(&self.query_added, query, true))
    }

    pub fn query_deleted(&self, query: &Query) -> Message {
        Message::from_html(with_query(&self.query_deleted, query, true))
    }

    /// One entry of the `/list` reply, including optional price bounds.
    pub fn query_summary(&self, query: &Query) -> Message {
        let mut html = with_query(&self.query_summary, query, true);
        if let Some(max) = query.params.max_price {
            html.push_str(&format!("\nMax price: <b>{max} €</b>"));
        }
        if let Some(min) = query.params.min_price {
            html.push_str(&format!("\nMin price: <b>{min} €</b>"));
        }
        if let Some(link) = &query.params.custom_link {
            html.push_str(&format!("\nLink: {}", escape_html(link)));
        }
        Message::from_html(html)
    }

    pub fn add_failed(&self, reason: &str) -> Message {
        Message::from_html(fill(&self.add_failed, &[("error", escape_html(reason))]))
    }

    /// Static text by template.
    pub fn text(&self, template: &str) -> Message {
        Message::from_html(template)
    }
}

/// Fill query placeholders: `{term}`, `{query_id}`, `{location}`, `{radius}`.
fn with_query(template: &str, query: &Query, html: bool) -> String {
    let mut values = query_values(query, html);
    values.push(("location", escape_if(html, &query.params.location_name)));
    fill(template, &values)
}

fn query_values(query: &Query, html: bool) -> Vec<(&'static str, String)> {
    vec![
        ("term", escape_if(html, &query.params.term)),
        ("query_id", query.id.to_string()),
        ("radius", query.params.radius_km.to_string()),
    ]
}

fn listing_values(listing: &Listing, query: &Query, html: bool) -> Vec<(&'static str, String)> {
    let mut values = query_values(query, html);
    values.extend([
        ("id", escape_if(html, &listing.id)),
        ("title", escape_if(html, &listing.title)),
        ("price", escape_if(html, &listing.price)),
        ("link", escape_if(html, &listing.link)),
        ("location", escape_if(html, &listing.location)),
    ]);
    values
}

fn escape_if(html: bool, text: &str) -> String {
    if html {
        escape_html(text)
    } else {
        text.to_string()
    }
}

/// Substitute known `{name}` placeholders in one pass over `template`.
///
/// Inserted values are never scanned again. Unknown placeholders stay as written.
fn fill(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let known = tail.find('}').and_then(|end| {
            let name = &tail[1..end];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (end, value))
        });
        match known {
            Some((end, value)) => {
                out.push_str(value);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

mod defaults {
    pub fn listing_html() -> String {
        "<b>{title}</b> - {price}\nFor search \"{term}\" (ID: {query_id})\n<a href=\"{link}\">open listing</a>".into()
    }
    pub fn listing_plain() -> String {
        "{title} - {price}\nFor search \"{term}\" (ID: {query_id})\nLink: {link}".into()
    }
    pub fn fetch_warning() -> String {
        "Listings for {term} (ID: {query_id}) could not be loaded. If the problem persists, \
         the search will be removed. The marketplace may be overloaded or the search contains errors."
            .into()
    }
    pub fn query_removed() -> String {
        "Listings for {term} (ID: {query_id}) could not be loaded. The problem occurred again, \
         the search has been removed."
            .into()
    }
    pub fn query_added() -> String {
        "Search for <b>{term}</b> in <b>{location}</b> added. ID: <b>{query_id}</b>".into()
    }
    pub fn query_deleted() -> String {
        "Search for {term} removed.".into()
    }
    pub fn query_not_found() -> String {
        "Search not found.".into()
    }
    pub fn query_summary() -> String {
        "Term: <b>{term}</b>\nRadius: <b>{radius} km</b>\nLocation: <b>{location}</b>\nID: <b>{query_id}</b>".into()
    }
    pub fn no_queries() -> String {
        "No searches found. Add one with <code>/add</code>.".into()
    }
    pub fn add_usage() -> String {
        "To add a search write <code>/add {term}, {location or postal code}, {radius}, {max price}?, {min price}?</code>".into()
    }
    pub fn add_failed() -> String {
        "Could not add the search: {error}".into()
    }
    pub fn remove_usage() -> String {
        "To remove a search write <code>/remove {ID}</code>. The ID is shown by <code>/list</code>.".into()
    }
    pub fn invalid_id() -> String {
        "Could not read the ID. It must be a positive whole number.".into()
    }
    pub fn unknown_command() -> String {
        "I don't know that command.".into()
    }
    pub fn help() -> String {
        "<u>Adding searches</u>\n\
         write <code>/add {term}, {location or postal code}, {radius}, {max price}?, {min price}?</code>\n\
         e.g. <code>/add bike, Köln, 20</code>\n\
         The search runs every minute and new listings are sent here.\n\n\
         <u>Listing searches</u>\n\
         write <code>/list</code>\n\n\
         <u>Removing searches</u>\n\
         write <code>/remove {ID}</code>\n\
         The ID is shown by <code>/list</code>. You will no longer receive messages for that search.\n"
            .into()
    }
}
