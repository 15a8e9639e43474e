use std::fmt::Write as _;

use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::controller::{ListController, ListPhase};
use crate::fetch_gate::ScopeId;

const MAX_NAME_WIDTH: usize = 40;
const ELLIPSIS: &str = "…";
const CHILD_MARK: &str = "└ ";
const GAP: &str = "  ";

struct Line {
    id: String,
    name: String,
    count: String,
    created: String,
}

impl Line {
    fn note(text: String) -> Self {
        Self {
            id: String::new(),
            name: text,
            count: String::new(),
            created: String::new(),
        }
    }
}

/// Renders the screen as an aligned text table: parent rows, the children of
/// expanded rows right below their parent, and a pagination footer.
pub fn render_screen(ctl: &ListController) -> String {
    let screen = ctl.screen();
    let parent_kind = screen.parent_kind();
    let child_kind = screen.child_kind();

    let mut out = String::new();
    let _ = write!(out, "{}", screen.title());
    if !ctl.search().is_empty() {
        let _ = write!(out, " (search: \"{}\")", ctl.search());
    }
    out.push('\n');

    if ctl.parents().is_empty() {
        let status = match ctl.phase(ScopeId::Top) {
            Some(ListPhase::Error) => "Could not load ".to_string(),
            _ if ctl.is_loading(ScopeId::Top) => "Loading ".to_string(),
            _ => "No ".to_string(),
        };
        let _ = writeln!(out, "{status}{}", parent_kind.plural_label());
        return out;
    }

    let header = Line {
        id: "ID".into(),
        name: "Name".into(),
        count: child_kind
            .map(|kind| capitalize(kind.plural_label()))
            .unwrap_or_default(),
        created: "Created".into(),
    };
    let mut lines = vec![header];
    for parent in ctl.parents() {
        lines.push(Line {
            id: parent.id.to_string(),
            name: truncate(&parent.display_name, MAX_NAME_WIDTH),
            count: child_kind
                .map(|_| parent.child_count.to_string())
                .unwrap_or_default(),
            created: parent.created_at_display.clone(),
        });
        let (Some(kind), true) = (child_kind, ctl.is_expanded(parent.id)) else {
            continue;
        };
        let Some(list) = ctl.child_list(parent.id) else {
            continue;
        };
        for child in list.rows() {
            lines.push(Line {
                id: child.id.to_string(),
                name: format!(
                    "{CHILD_MARK}{}",
                    truncate(&child.display_name, MAX_NAME_WIDTH - CHILD_MARK.width())
                ),
                count: String::new(),
                created: child.created_at_display.clone(),
            });
        }
        let pagination = list.pagination();
        if list.rows().is_empty() {
            let status = if list.is_loading() {
                format!("loading {}", kind.plural_label())
            } else if list.phase() == ListPhase::Error {
                format!("could not load {}", kind.plural_label())
            } else {
                format!("no {}", kind.plural_label())
            };
            lines.push(Line::note(format!("{CHILD_MARK}{status}")));
        } else if pagination.page_count() > 1 {
            lines.push(Line::note(format!(
                "{CHILD_MARK}page {} of {}",
                pagination.current_page,
                pagination.page_count()
            )));
        }
    }

    let id_width = column_width(&lines, |line| &line.id);
    let name_width = column_width(&lines, |line| &line.name);
    let count_width = column_width(&lines, |line| &line.count);
    for line in &lines {
        let mut row = String::new();
        row.push_str(&pad_left(&line.id, id_width));
        row.push_str(GAP);
        row.push_str(&pad_right(&line.name, name_width));
        if count_width > 0 {
            row.push_str(GAP);
            row.push_str(&pad_left(&line.count, count_width));
        }
        row.push_str(GAP);
        row.push_str(&line.created);
        let _ = writeln!(out, "{}", row.trim_end());
    }

    let pagination = ctl.parent_pagination();
    let _ = write!(
        out,
        "Page {} of {} · {} {}",
        pagination.current_page,
        pagination.page_count().max(1),
        pagination.total_items,
        parent_kind.plural_label()
    );
    if let Some((first, last)) = pagination.visible_range() {
        let _ = write!(out, " (showing {first}-{last})");
    }
    out.push('\n');
    out
}

fn column_width(lines: &[Line], cell: impl Fn(&Line) -> &String) -> usize {
    lines
        .iter()
        .map(|line| cell(line).width())
        .max()
        .unwrap_or(0)
}

/// Cuts `text` to at most `max` columns on grapheme boundaries.
pub fn truncate(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }
    let budget = max.saturating_sub(ELLIPSIS.width());
    let mut used = 0;
    let mut out = String::new();
    for grapheme in text.graphemes(true) {
        let width = grapheme.width();
        if used + width > budget {
            break;
        }
        used += width;
        out.push_str(grapheme);
    }
    out.push_str(ELLIPSIS);
    out
}

fn pad_right(text: &str, width: usize) -> String {
    let fill = width.saturating_sub(text.width());
    format!("{text}{}", " ".repeat(fill))
}

fn pad_left(text: &str, width: usize) -> String {
    let fill = width.saturating_sub(text.width());
    format!("{}{text}", " ".repeat(fill))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use crate::api::{ResourceKind, Screen};
    use crate::controller::ControllerSettings;

    fn settings() -> ControllerSettings {
        ControllerSettings {
            page_size: 5,
            child_page_size: 2,
            ..ControllerSettings::default()
        }
    }

    #[tokio::test]
    async fn expanded_rows_render_under_their_parent() {
        let api = FakeApi::new();
        let ids = api.seed(ResourceKind::Category, 3);
        api.seed_children(ids[0], ResourceKind::Subcategory, 2);
        let mut ctl = ListController::new(Screen::Categories, settings());
        ctl.load(&api).await;
        let ticket = ctl.expand(ids[0]);
        ctl.fetch(&api, ticket).await;

        insta::assert_snapshot!(render_screen(&ctl), @r###"
        Categories
        ID  Name               Subcategories  Created
         1  category 1                     2  04/12/2024
         4  └ subcategory 1.1                 04/12/2024
         5  └ subcategory 1.2                 04/12/2024
         2  category 2                     0  04/12/2024
         3  category 3                     0  04/12/2024
        Page 1 of 1 · 3 categories (showing 1-3)
        "###);
    }

    #[tokio::test]
    async fn flat_screen_has_no_count_column() {
        let api = FakeApi::new();
        api.seed(ResourceKind::Job, 2);
        let mut ctl = ListController::new(Screen::Jobs, settings());
        ctl.load(&api).await;

        insta::assert_snapshot!(render_screen(&ctl), @r###"
        Jobs
        ID  Name   Created
         1  job 1  04/12/2024
         2  job 2  04/12/2024
        Page 1 of 1 · 2 jobs (showing 1-2)
        "###);
    }

    #[tokio::test]
    async fn empty_search_result_says_so() {
        let api = FakeApi::new();
        api.seed(ResourceKind::Company, 2);
        let mut ctl = ListController::new(Screen::Companies, settings());
        let ticket = ctl.set_search("zzz");
        ctl.fetch(&api, ticket).await;

        assert_eq!(render_screen(&ctl), "Companies (search: \"zzz\")\nNo companies\n");
    }

    #[test]
    fn truncation_respects_graphemes_and_width() {
        assert_eq!(truncate("Plumbing", 8), "Plumbing");
        assert_eq!(truncate("Plumbing", 5), "Plum…");
        assert_eq!(truncate("東京都庁舎", 6), "東京…");
        assert_eq!(truncate("cafe\u{301} noir", 5), "cafe\u{301}…");
        assert_eq!(pad_left("7", 3), "  7");
        assert_eq!(pad_right("東", 4), "東  ");
        assert_eq!(capitalize("jobs"), "Jobs");
    }
}
