use std::fmt::Write as _;
use std::io::{self, Read};

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use crossbeam_channel::Receiver;
use serde_json::{Map, Value};

use crate::api::{RecordDraft, RecordId, Screen};
use crate::config::AdminConfig;
use crate::controller::{ControllerSettings, ListController, ListPhase, MutationOrchestrator};
use crate::fetch_gate::ScopeId;
use crate::notify::{Notice, NoticeLevel, NoticeSink};
use crate::render::render_screen;
use crate::storage::StorageHandle;
use crate::table_event::{PageRequest, SortOrder, Sorter, TableChange};

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Screen to show (categories, companies, jobs); defaults to the configured one
    #[arg(long)]
    pub screen: Option<Screen>,
    /// Page of the top-level table
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    /// Rows per page (defaults to lists.page_size)
    #[arg(long)]
    pub page_size: Option<u32>,
    /// Only show top-level rows whose name contains this text
    #[arg(long)]
    pub search: Option<String>,
    /// Sort column: name, createdAt, childCount or id
    #[arg(long)]
    pub sort: Option<String>,
    /// Sort descending instead of ascending
    #[arg(long, requires = "sort")]
    pub desc: bool,
    /// Expand a row and show its nested records (repeatable)
    #[arg(long = "expand", value_name = "ID")]
    pub expand: Vec<RecordId>,
    /// Page shown inside expanded rows
    #[arg(long, default_value_t = 1)]
    pub child_page: u32,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Screen the record belongs to; defaults to the configured one
    #[arg(long)]
    pub screen: Option<Screen>,
    /// Parent row id when addressing a nested record; on the jobs screen,
    /// the company a new job belongs to
    #[arg(long)]
    pub parent: Option<RecordId>,
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Display name (prompted if omitted)
    #[arg()]
    pub name: Option<String>,
    /// Extra fields as a JSON object. If omitted, read from stdin when piped.
    #[arg(long)]
    pub extra: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Record identifier
    pub id: RecordId,
    /// New display name (prompted if omitted)
    #[arg()]
    pub name: Option<String>,
    /// Extra fields as a JSON object. If omitted, read from stdin when piped.
    #[arg(long)]
    pub extra: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Record identifier
    pub id: RecordId,
    /// Page the record is listed on; an emptied page steps back one
    #[arg(long, default_value_t = 1)]
    pub page: u32,
}

/// A controller wired to a notice channel the command can drain.
struct Session {
    ctl: ListController,
    notices: Receiver<Notice>,
}

impl Session {
    fn open(config: &AdminConfig, screen: Option<Screen>) -> Self {
        let (tx, notices) = crossbeam_channel::unbounded();
        let ctl = ListController::new(
            screen.unwrap_or(config.screen),
            ControllerSettings::from_config(config),
        )
        .with_notices(NoticeSink::new(tx));
        Self { ctl, notices }
    }

    fn drain(&self) -> (Vec<String>, Vec<String>) {
        let mut infos = Vec::new();
        let mut errors = Vec::new();
        for notice in self.notices.try_iter() {
            match notice.level {
                NoticeLevel::Info => infos.push(notice.message),
                NoticeLevel::Error => errors.push(notice.message),
            }
        }
        (infos, errors)
    }

    fn ensure_healthy(&self, scope: ScopeId) -> Result<()> {
        if self.ctl.phase(scope) != Some(ListPhase::Error) {
            return Ok(());
        }
        let message = match scope {
            ScopeId::Top => self.ctl.parent_list().last_error(),
            ScopeId::Parent(id) => self.ctl.child_list(id).and_then(|list| list.last_error()),
        };
        bail!("{}", message.unwrap_or("request failed"))
    }

    fn failure(&self, fallback: &str) -> anyhow::Error {
        let (_, errors) = self.drain();
        if errors.is_empty() {
            anyhow!("{fallback}")
        } else {
            anyhow!("{}", errors.join("; "))
        }
    }
}

fn scope_of(target: &TargetArgs) -> ScopeId {
    match target.parent {
        Some(parent_id) => ScopeId::Parent(parent_id),
        None => ScopeId::Top,
    }
}

pub async fn list(config: &AdminConfig, storage: &StorageHandle, args: &ListArgs) -> Result<String> {
    let mut session = Session::open(config, args.screen);
    let ctl = &mut session.ctl;

    if let Some(text) = &args.search {
        let ticket = ctl.set_search(text);
        ctl.fetch(storage, ticket).await;
    }

    let page = args.page.max(1);
    let page_size = args.page_size.unwrap_or(ctl.settings().page_size);
    let change = match &args.sort {
        Some(field) => {
            let order = if args.desc {
                SortOrder::Descend
            } else {
                SortOrder::Ascend
            };
            TableChange {
                pagination: PageRequest {
                    current: page,
                    page_size,
                },
                sorter: Sorter::new(field.clone(), order),
                action: Some("sort".into()),
            }
        }
        None => TableChange::paginate(page, page_size),
    };
    let ticket = ctl.on_table_change(change);
    ctl.fetch(storage, ticket).await;
    session.ensure_healthy(ScopeId::Top)?;

    let ctl = &mut session.ctl;
    ctl.load(storage).await;
    session.ensure_healthy(ScopeId::Top)?;

    let ctl = &mut session.ctl;
    let child_page_size = ctl.settings().child_page_size;
    for parent_id in &args.expand {
        let ticket = if args.child_page > 1 {
            ctl.expand_at(*parent_id, args.child_page, child_page_size)
        } else {
            ctl.expand(*parent_id)
        };
        ctl.fetch(storage, ticket).await;
    }

    let mut out = render_screen(&session.ctl);
    let (_, errors) = session.drain();
    for error in errors {
        let _ = writeln!(out, "warning: {error}");
    }
    Ok(out)
}

pub async fn create(
    config: &AdminConfig,
    storage: &StorageHandle,
    target: &TargetArgs,
    name: &str,
    extra: Option<&str>,
) -> Result<String> {
    let mut session = Session::open(config, target.screen);
    let mut draft = build_draft(name, extra)?;
    let screen = session.ctl.screen();
    let owner_field = screen.parent_kind().owner_field();
    // On a flat screen of a nested kind `--parent` names the owner instead.
    let scope = match (target.parent, screen.child_kind(), owner_field) {
        (Some(owner), None, Some(field)) => {
            draft.extra.insert(field, owner.into());
            ScopeId::Top
        }
        _ => scope_of(target),
    };
    if !session.ctl.open_create(scope) {
        bail!("{} has no nested records", screen.title());
    }
    if !session.ctl.submit(storage, draft).await {
        let reason = session
            .ctl
            .overlay()
            .and_then(|overlay| overlay.error.clone())
            .unwrap_or_else(|| "create failed".to_string());
        bail!("{reason}");
    }
    Ok(summary(&session))
}

pub async fn update(
    config: &AdminConfig,
    storage: &StorageHandle,
    target: &TargetArgs,
    id: RecordId,
    name: &str,
    extra: Option<&str>,
) -> Result<String> {
    let mut session = Session::open(config, target.screen);
    let scope = scope_of(target);
    let draft = build_draft(name, extra)?;
    let ctl = &mut session.ctl;
    let ticket = match scope {
        ScopeId::Top => {
            let pagination = ctl.parent_pagination();
            ctl.request_parents(pagination.current_page, pagination.page_size)
        }
        ScopeId::Parent(parent_id) => ctl.expand(parent_id),
    };
    ctl.fetch(storage, ticket).await;

    if ctl.open_edit(scope, id) {
        if !ctl.submit(storage, draft).await {
            return Err(session.failure("update failed"));
        }
        return Ok(summary(&session));
    }

    // Not on the first page; skip the form and update directly.
    let record = MutationOrchestrator::new(storage)
        .update(ctl, scope, id, &draft)
        .await
        .map_err(|err| anyhow!(err.user_message()))?;
    let mut out = summary(&session);
    let _ = writeln!(out, "Saved #{} \"{}\"", record.id, record.display_name);
    Ok(out)
}

pub async fn delete(
    config: &AdminConfig,
    storage: &StorageHandle,
    args: &DeleteArgs,
) -> Result<String> {
    let mut session = Session::open(config, args.target.screen);
    let scope = scope_of(&args.target);
    let ctl = &mut session.ctl;
    if ctl.api_scope(scope).is_none() {
        bail!("{} has no nested records", ctl.screen().title());
    }
    let page_size = match scope {
        ScopeId::Top => ctl.settings().page_size,
        ScopeId::Parent(_) => ctl.settings().child_page_size,
    };
    let ticket = ctl.request_page(scope, args.page, page_size);
    ctl.fetch(storage, ticket).await;
    session.ensure_healthy(scope)?;

    if !session.ctl.delete(storage, scope, args.id).await {
        return Err(session.failure("delete failed"));
    }
    let mut out = summary(&session);
    if let Some(pagination) = session.ctl.pagination(scope) {
        let _ = writeln!(
            out,
            "Now on page {} of {}",
            pagination.current_page,
            pagination.page_count().max(1)
        );
    }
    Ok(out)
}

pub fn seed(storage: &StorageHandle) -> Result<String> {
    let summary = storage.seed_demo().context("seeding demo directory")?;
    Ok(format!(
        "Seeded {} top-level and {} nested records\n",
        summary.parents, summary.children
    ))
}

fn summary(session: &Session) -> String {
    let (infos, errors) = session.drain();
    let mut out = String::new();
    for info in infos {
        let _ = writeln!(out, "{info}");
    }
    for error in errors {
        let _ = writeln!(out, "warning: {error}");
    }
    out
}

pub fn build_draft(name: &str, extra: Option<&str>) -> Result<RecordDraft> {
    let mut draft = RecordDraft::named(name.trim());
    if let Some(raw) = extra.map(str::trim).filter(|raw| !raw.is_empty()) {
        let fields: Map<String, Value> =
            serde_json::from_str(raw).context("parsing extra fields as a JSON object")?;
        draft.extra = fields;
        if draft.extra.remove("name").is_some() {
            tracing::debug!("ignoring `name` inside extra fields");
        }
    }
    Ok(draft)
}

/// Name from the argument, or asked for interactively.
pub fn name_or_prompt(name: Option<String>) -> Result<String> {
    let name = match name {
        Some(name) => name,
        None => prompt("Name")?,
    };
    let name = name.trim().to_owned();
    if name.is_empty() {
        bail!("name cannot be empty");
    }
    Ok(name)
}

pub fn extra_or_stdin(extra: Option<String>) -> Result<Option<String>> {
    match extra {
        Some(extra) => Ok(Some(extra)),
        None => read_stdin(),
    }
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}
