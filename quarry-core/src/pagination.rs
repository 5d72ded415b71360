//! Request-scoped pagination: offset slots read from the query string and
//! page-link rendering

use crate::{Error, Result, ResultSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use url::{Position, Url};

const OFFSET_PARAM: &str = "_offset_";
const LINK_RADIUS: u64 = 4;

/// A pagination slot and the offset the request asked for in it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSlot {
    pub number: usize,
    pub offset: u64,
}

/// Pagination state for one request.
///
/// Each paginated query takes the next slot number (1, 2, 3, ...) and reads
/// its offset from the `_offset_<slot>` query parameter. Slot numbers follow
/// call order, so a page only finds its offset again on the next request when
/// queries are paginated in the same order.
#[derive(Debug)]
pub struct Paginator {
    url: Url,
    relative: bool,
    next_slot: AtomicUsize,
}

impl Paginator {
    /// Paginate for the request at `current_url`, absolute or path-relative
    pub fn new(current_url: &str) -> Result<Self> {
        match Url::parse(current_url) {
            Ok(url) => Ok(Self::from_url(url, false)),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = Url::parse("http://localhost/")
                    .map_err(|e| Error::invalid_argument(e.to_string()))?;
                let url = base
                    .join(current_url)
                    .map_err(|e| Error::invalid_argument(format!("invalid request url: {}", e)))?;
                Ok(Self::from_url(url, true))
            }
            Err(e) => Err(Error::invalid_argument(format!("invalid request url: {}", e))),
        }
    }

    fn from_url(url: Url, relative: bool) -> Self {
        Self {
            url,
            relative,
            next_slot: AtomicUsize::new(0),
        }
    }

    /// Assign the next slot
    pub fn next_slot(&self) -> PageSlot {
        let number = self.next_slot.fetch_add(1, Ordering::SeqCst) + 1;
        PageSlot {
            number,
            offset: self.offset_for(number),
        }
    }

    /// Offset requested for `slot`; missing or malformed values mean `0`
    pub fn offset_for(&self, slot: usize) -> u64 {
        let name = param_name(slot);
        self.url
            .query_pairs()
            .find(|(key, _)| *key == name)
            .and_then(|(_, value)| value.parse().ok())
            .unwrap_or(0)
    }

    /// The current URL with `slot`'s offset replaced by `offset`
    pub fn page_url(&self, slot: usize, offset: u64) -> String {
        let name = param_name(slot);
        let kept: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(key, _)| *key != name)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let mut url = self.url.clone();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(&name, &offset.to_string());

        if self.relative {
            url[Position::BeforePath..].to_string()
        } else {
            url.to_string()
        }
    }
}

fn param_name(slot: usize) -> String {
    format!("{}{}", OFFSET_PARAM, slot)
}

/// One page of rows along with the size of the whole result
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub rows: ResultSet,
    /// Rows the query matches without its LIMIT
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub slot: usize,
}

impl Page {
    pub fn page_count(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(self.limit)
    }

    /// 1-based number of this page
    pub fn current_page(&self) -> u64 {
        if self.limit == 0 {
            return 1;
        }
        (self.offset / self.limit).saturating_add(1)
    }

    pub fn previous_page(&self) -> Option<u64> {
        let current = self.current_page();
        (current > 1).then(|| current - 1)
    }

    pub fn next_page(&self) -> Option<u64> {
        let current = self.current_page();
        (current < self.page_count()).then(|| current.saturating_add(1))
    }

    /// Offset of the 1-based `page`
    pub fn offset_of(&self, page: u64) -> u64 {
        page.saturating_sub(1).saturating_mul(self.limit)
    }

    /// Render page links as an HTML list, or nothing for a single page
    pub fn links(&self, paginator: &Paginator) -> String {
        let pages = self.page_count();
        if pages <= 1 {
            return String::new();
        }

        let current = self.current_page();
        let link = |page: u64, label: &str| {
            format!(
                "<li><a href=\"{}\">{}</a></li>",
                escape_html(&paginator.page_url(self.slot, self.offset_of(page))),
                label
            )
        };

        let mut html = String::from("<ul class=\"pagination\">");
        if let Some(previous) = self.previous_page() {
            html.push_str(&link(previous, "&laquo;"));
        }
        let first = current.saturating_sub(LINK_RADIUS).max(1);
        let last = current.saturating_add(LINK_RADIUS).min(pages);
        for page in first..=last {
            if page == current {
                html.push_str(&format!("<li class=\"active\"><span>{}</span></li>", page));
            } else {
                html.push_str(&link(page, &page.to_string()));
            }
        }
        if let Some(next) = self.next_page() {
            html.push_str(&link(next, "&raquo;"));
        }
        html.push_str("</ul>");
        html
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
