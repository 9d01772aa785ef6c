//! Incremental paginator
//!
//! Text arrives in chunks of any size and is laid out into pages whose
//! content never exceeds the paginator's capacity. Sizes are counted in
//! characters. When a chunk does not fit the open page it is split after the
//! last newline (or failing that, the last space) that fits; a page is never
//! split inside a character, and an optional code fence is applied per page
//! at render time so a split never lands inside it.

/// Appended to a segment cut short because it cannot fit any page
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// Shown instead of an empty message body
pub const EMPTY_PAGE: &str = "\u{200b}";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PagerError {
    #[error("page size {max_size} leaves no room for content after {overhead} characters of fence")]
    TooSmall { max_size: usize, overhead: usize },
}

/* ===================== Navigation ===================== */

/// Controls offered alongside a page when there is more than one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavControl {
    First,
    Previous,
    Current,
    Next,
    Last,
    GoTo,
    Close,
}

impl NavControl {
    pub const ALL: [NavControl; 7] = [
        NavControl::First,
        NavControl::Previous,
        NavControl::Current,
        NavControl::Next,
        NavControl::Last,
        NavControl::GoTo,
        NavControl::Close,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            NavControl::First => "|<",
            NavControl::Previous => "<",
            NavControl::Current => "#",
            NavControl::Next => ">",
            NavControl::Last => ">|",
            NavControl::GoTo => "go to",
            NavControl::Close => "x",
        }
    }
}

/// A navigation request against the page set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavAction {
    First,
    Previous,
    Next,
    Last,
    /// 0-based page index, clamped
    GoTo(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    /// 0-based index of the rendered page
    pub page: usize,
    pub page_count: usize,
    pub controls: Vec<NavControl>,
}

/// What a display target shows for one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub content: String,
    pub navigation: Option<Navigation>,
    /// Completion or cancellation line shown under the content
    pub status: Option<String>,
}

impl RenderedPage {
    /// Plain message with no navigation or status
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            navigation: None,
            status: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Flatten into one block of text for targets without rich controls
    pub fn to_text(&self) -> String {
        let mut out = self.content.clone();
        if let Some(nav) = &self.navigation {
            out.push_str(&format!("\nPage {}/{}", nav.page + 1, nav.page_count));
        }
        if let Some(status) = &self.status {
            out.push('\n');
            out.push_str(status);
        }
        out
    }
}

/* ===================== Paginator ===================== */

#[derive(Debug, Clone)]
struct Fence {
    prefix: String,
    suffix: String,
}

#[derive(Debug, Clone)]
pub struct Paginator {
    max_size: usize,
    fence: Option<Fence>,
    closed: Vec<String>,
    open: String,
    /// Characters in `open`
    open_len: usize,
    display_page: usize,
    /// Keep showing the newest page as pages are added
    follow: bool,
    truncated: bool,
}

impl Paginator {
    pub fn new(max_size: usize) -> Result<Self, PagerError> {
        let paginator = Self {
            max_size,
            fence: None,
            closed: Vec::new(),
            open: String::new(),
            open_len: 0,
            display_page: 0,
            follow: true,
            truncated: false,
        };
        paginator.check_capacity()?;
        Ok(paginator)
    }

    /// Wrap each rendered page as `prefix\n<content>\nsuffix`
    pub fn with_fence(
        mut self,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Result<Self, PagerError> {
        self.fence = Some(Fence {
            prefix: prefix.into(),
            suffix: suffix.into(),
        });
        self.check_capacity()?;
        Ok(self)
    }

    fn check_capacity(&self) -> Result<(), PagerError> {
        let overhead = self.fence_overhead();
        if self.max_size <= overhead + TRUNCATION_MARKER.chars().count() {
            return Err(PagerError::TooSmall {
                max_size: self.max_size,
                overhead,
            });
        }
        Ok(())
    }

    fn fence_overhead(&self) -> usize {
        self.fence
            .as_ref()
            .map(|f| f.prefix.chars().count() + f.suffix.chars().count() + 2)
            .unwrap_or(0)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Content characters a page may hold
    pub fn capacity(&self) -> usize {
        self.max_size - self.fence_overhead()
    }

    /// True if any segment was cut short
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /* ---------- Feeding ---------- */

    pub fn feed(&mut self, chunk: &str) {
        let capacity = self.capacity();
        let mut rest = chunk;

        while !rest.is_empty() {
            let room = capacity - self.open_len;
            let Some(cut) = byte_offset_of_char(rest, room) else {
                // Everything left fits
                self.push_open(rest);
                if self.open_len == capacity {
                    self.close_page();
                }
                return;
            };

            let head = &rest[..cut];
            if let Some(pos) = head.rfind('\n').or_else(|| head.rfind(' ')) {
                self.push_open(&rest[..=pos]);
                self.close_page();
                rest = &rest[pos + 1..];
                continue;
            }

            if self.open_len > 0 {
                self.close_page();
                continue;
            }

            // No break point within a whole empty page: cut the segment short
            let segment_end = rest
                .find(['\n', ' '])
                .map(|pos| pos + 1)
                .unwrap_or(rest.len());
            let keep = capacity - TRUNCATION_MARKER.chars().count();
            let keep_end = byte_offset_of_char(rest, keep).unwrap_or(rest.len());
            self.push_open(&rest[..keep_end]);
            self.push_open(TRUNCATION_MARKER);
            self.truncated = true;
            self.close_page();
            rest = &rest[segment_end..];
        }
    }

    fn push_open(&mut self, text: &str) {
        self.open.push_str(text);
        self.open_len += text.chars().count();
    }

    fn close_page(&mut self) {
        self.closed.push(std::mem::take(&mut self.open));
        self.open_len = 0;
    }

    /* ---------- Pages ---------- */

    /// Raw page contents, including the open page when it has content
    pub fn pages(&self) -> Vec<&str> {
        let mut pages: Vec<&str> = self.closed.iter().map(String::as_str).collect();
        if !self.open.is_empty() {
            pages.push(&self.open);
        }
        pages
    }

    pub fn page_count(&self) -> usize {
        self.closed.len() + usize::from(!self.open.is_empty())
    }

    fn last_page(&self) -> usize {
        self.page_count().saturating_sub(1)
    }

    /// Index of the page currently shown
    pub fn display_page(&self) -> usize {
        if self.follow {
            self.last_page()
        } else {
            self.display_page.min(self.last_page())
        }
    }

    /// Show page `index`, clamped to the page range
    pub fn set_display_page(&mut self, index: usize) {
        let last = self.last_page();
        self.display_page = index.min(last);
        self.follow = self.display_page == last;
    }

    /// Apply a navigation action; true if the displayed page changed
    pub fn navigate(&mut self, action: NavAction) -> bool {
        let current = self.display_page();
        let target = match action {
            NavAction::First => 0,
            NavAction::Previous => current.saturating_sub(1),
            NavAction::Next => current + 1,
            NavAction::Last => self.last_page(),
            NavAction::GoTo(index) => index,
        };
        self.set_display_page(target);
        self.display_page() != current
    }

    /* ---------- Rendering ---------- */

    pub fn render(&self, page_index: usize) -> RenderedPage {
        let page_count = self.page_count();
        let index = page_index.min(self.last_page());
        let body = self.pages().get(index).copied().unwrap_or("");

        let content = match &self.fence {
            Some(fence) => format!("{}\n{}\n{}", fence.prefix, body, fence.suffix),
            None if body.is_empty() => EMPTY_PAGE.to_string(),
            None => body.to_string(),
        };

        let navigation = (page_count > 1).then(|| Navigation {
            page: index,
            page_count,
            controls: NavControl::ALL.to_vec(),
        });

        RenderedPage {
            content,
            navigation,
            status: None,
        }
    }

    pub fn render_current(&self) -> RenderedPage {
        self.render(self.display_page())
    }
}

/// Byte offset of the `n`th character, or None if `s` has `n` or fewer characters
fn byte_offset_of_char(s: &str, n: usize) -> Option<usize> {
    s.char_indices().nth(n).map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_lens(p: &Paginator) -> Vec<usize> {
        p.pages().iter().map(|page| page.chars().count()).collect()
    }

    #[test]
    fn test_equal_chunks_fill_pages_exactly() {
        let mut p = Paginator::new(2000).unwrap();
        let chunk = "a".repeat(1000);
        for _ in 0..4 {
            p.feed(&chunk);
        }
        assert_eq!(char_lens(&p), vec![2000, 2000]);
        assert_eq!(p.pages().concat(), chunk.repeat(4));
    }

    #[test]
    fn test_splits_after_last_newline() {
        let mut p = Paginator::new(30).unwrap();
        p.feed("hello world\nsecond line\nthird line is long");
        assert_eq!(
            p.pages(),
            vec!["hello world\nsecond line\n", "third line is long"]
        );
    }

    #[test]
    fn test_splits_after_space_without_newline() {
        let mut p = Paginator::new(20).unwrap();
        p.feed("alpha beta gamma delta");
        assert_eq!(p.pages(), vec!["alpha beta gamma ", "delta"]);
    }

    #[test]
    fn test_unbreakable_remainder_moves_to_next_page() {
        let mut p = Paginator::new(20).unwrap();
        p.feed("abcdefghijklmnop");
        p.feed("qrstuvwxyz");
        assert_eq!(p.pages(), vec!["abcdefghijklmnop", "qrstuvwxyz"]);
        assert!(!p.is_truncated());
    }

    #[test]
    fn test_oversized_segment_is_truncated() {
        let mut p = Paginator::new(20).unwrap();
        p.feed(&format!("{} tail", "x".repeat(50)));
        let pages = p.pages();
        assert_eq!(pages[0], format!("{}{}", "x".repeat(8), TRUNCATION_MARKER));
        assert_eq!(pages[0].chars().count(), 20);
        assert_eq!(pages[1], "tail");
        assert!(p.is_truncated());
    }

    #[test]
    fn test_splits_respect_characters() {
        let mut p = Paginator::new(15).unwrap();
        p.feed(&format!("{} {}", "é".repeat(10), "ü".repeat(10)));
        assert_eq!(char_lens(&p), vec![11, 10]);
        assert_eq!(p.pages()[1], "ü".repeat(10));
    }

    #[test]
    fn test_fence_reduces_capacity() {
        let mut p = Paginator::new(40).unwrap().with_fence("```py", "```").unwrap();
        assert_eq!(p.capacity(), 30);
        p.feed(&"y".repeat(45));
        for i in 0..p.page_count() {
            let rendered = p.render(i);
            assert!(rendered.content.chars().count() <= 40);
            assert!(rendered.content.starts_with("```py\n"));
            assert!(rendered.content.ends_with("\n```"));
        }
    }

    #[test]
    fn test_too_small_for_fence() {
        assert!(Paginator::new(12).is_err());
        let err = Paginator::new(20).unwrap().with_fence("```ansi", "```").unwrap_err();
        assert_eq!(
            err,
            PagerError::TooSmall {
                max_size: 20,
                overhead: 12
            }
        );
    }

    #[test]
    fn test_mixed_chunks_never_exceed_capacity() {
        let mut p = Paginator::new(64).unwrap().with_fence("```", "```").unwrap();
        let mut fed = String::new();
        // Deterministic mix of words, newlines and long runs
        for i in 0..200usize {
            let chunk = match i % 5 {
                0 => format!("line {}\n", i),
                1 => "word ".repeat(i % 7 + 1),
                2 => "z".repeat(i % 40),
                3 => format!("{}\n{}", "q".repeat(i % 30), "r".repeat(i % 11)),
                _ => " ".to_string(),
            };
            fed.push_str(&chunk);
            p.feed(&chunk);
        }
        for i in 0..p.page_count() {
            assert!(p.render(i).content.chars().count() <= 64);
        }
        assert!(!p.is_truncated());
        assert_eq!(p.pages().concat(), fed);
    }

    #[test]
    fn test_single_page_has_no_navigation() {
        let mut p = Paginator::new(100).unwrap();
        p.feed("short");
        assert_eq!(p.render(0).navigation, None);

        p.feed(&" more".repeat(30));
        let nav = p.render(0).navigation.expect("Expected navigation");
        assert_eq!(nav.page, 0);
        assert_eq!(nav.page_count, p.page_count());
        assert!(nav.controls.contains(&NavControl::Close));
    }

    #[test]
    fn test_empty_paginator_renders_placeholder() {
        let p = Paginator::new(100).unwrap();
        assert_eq!(p.page_count(), 0);
        assert_eq!(p.render_current().content, EMPTY_PAGE);
    }

    #[test]
    fn test_display_follows_newest_page() {
        let mut p = Paginator::new(20).unwrap();
        p.feed(&"a".repeat(20));
        p.feed(&"b".repeat(20));
        assert_eq!(p.display_page(), 1);

        assert!(p.navigate(NavAction::First));
        p.feed(&"c".repeat(20));
        assert_eq!(p.display_page(), 0, "Navigated away, so it stays put");

        assert!(p.navigate(NavAction::Last));
        p.feed("d");
        assert_eq!(p.display_page(), 3);
    }

    #[test]
    fn test_navigation_clamps() {
        let mut p = Paginator::new(20).unwrap();
        for _ in 0..3 {
            p.feed(&"a".repeat(20));
        }
        assert_eq!(p.page_count(), 3);

        assert!(!p.navigate(NavAction::Next));
        assert!(!p.navigate(NavAction::GoTo(99)));
        assert!(p.navigate(NavAction::Previous));
        assert_eq!(p.display_page(), 1);
        p.set_display_page(0);
        assert!(!p.navigate(NavAction::Previous));
    }

    #[test]
    fn test_to_text_includes_page_and_status() {
        let mut p = Paginator::new(20).unwrap();
        p.feed(&"a".repeat(20));
        p.feed(&"a".repeat(10));
        let text = p.render(1).with_status("[cancelled]").to_text();
        assert_eq!(text, format!("{}\nPage 2/2\n[cancelled]", "a".repeat(10)));
    }
}
