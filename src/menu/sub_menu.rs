use super::pager::{self, Pager};
use super::{Input, MenuEnv, MenuOutcome, MenuView, CANCEL_EMOJI, NEXT_EMOJI, PREV_EMOJI};
use poise::serenity_prelude as serenity;
use serenity::{ChannelId, UserId};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

pub type ActionFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

type ActionHandler<'a, C, T> = Box<dyn FnOnce(C) -> ActionFuture<'a, T> + Send + 'a>;

/// One selectable row of a [`SubMenu`].
pub struct MenuAction<'a, C, T> {
    names: Vec<String>,
    title: String,
    handler: ActionHandler<'a, C, T>,
}

impl<'a, C, T> MenuAction<'a, C, T> {
    pub fn new<F>(names: &[&str], title: impl Into<String>, handler: F) -> Self
    where
        F: FnOnce(C) -> ActionFuture<'a, T> + Send + 'a,
    {
        Self {
            names: names.iter().map(|n| n.to_lowercase()).collect(),
            title: title.into(),
            handler: Box::new(handler),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn matches(&self, input: &str) -> bool {
        let input = input.trim().to_lowercase();
        self.names.iter().any(|n| *n == input)
    }
}

#[derive(Debug, Clone)]
pub struct SubMenuOptions {
    pub header: String,
    pub title: Option<String>,
    pub page_size: usize,
}

impl SubMenuOptions {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            title: None,
            page_size: pager::MAX_PAGE_SIZE,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Pick(usize),
    Next,
    Prev,
    Cancel,
    Ignore,
}

/// Reaction-paged list of actions; resolves to the chosen action's result.
pub struct SubMenu<'a> {
    env: MenuEnv<'a>,
    options: SubMenuOptions,
}

impl<'a> SubMenu<'a> {
    pub fn new(env: MenuEnv<'a>, options: SubMenuOptions) -> Self {
        Self { env, options }
    }

    /// Runs the menu for `user_id` in `channel_id`.
    ///
    /// `direct_input` that names an action (or a row of the first page)
    /// dispatches immediately without rendering anything. Handler errors are
    /// returned as is.
    pub async fn start<'b, C, T>(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        direct_input: Option<&str>,
        context: C,
        actions: Vec<MenuAction<'b, C, T>>,
    ) -> anyhow::Result<MenuOutcome<T>> {
        if actions.is_empty() {
            return Ok(MenuOutcome::Cancelled);
        }
        let mut pager = Pager::new(actions, self.options.page_size);

        if let Some(input) = direct_input.filter(|i| !i.trim().is_empty()) {
            if let Choice::Pick(index) = classify_text(&pager, input) {
                debug!("Sub menu resolved directly from input {:?}", input);
                return run(pager, index, context).await;
            }
        }

        let mut collector = self.env.collector(channel_id, user_id);
        collector.render(&self.view(&pager)).await?;
        let mut controls: Vec<&str> = pager.row_emojis().to_vec();
        if pager.has_many_pages() {
            controls.push(PREV_EMOJI);
            controls.push(NEXT_EMOJI);
        }
        controls.push(CANCEL_EMOJI);
        collector.decorate(&controls).await;

        loop {
            let Some(input) = collector.next().await else {
                collector.expire(&self.env.labels.expired_view()).await;
                return Ok(MenuOutcome::TimedOut);
            };
            let choice = match &input {
                Input::Reaction(emoji) => classify_reaction(&pager, emoji),
                Input::Text(text) => classify_text(&pager, text),
            };
            match choice {
                Choice::Pick(index) => {
                    collector.finish().await;
                    return run(pager, index, context).await;
                }
                Choice::Cancel => {
                    collector.expire(&self.env.labels.cancelled_view()).await;
                    return Ok(MenuOutcome::Cancelled);
                }
                Choice::Next | Choice::Prev => {
                    let moved = if choice == Choice::Next {
                        pager.next_page()
                    } else {
                        pager.prev_page()
                    };
                    if moved {
                        collector.render(&self.view(&pager)).await?;
                    }
                }
                Choice::Ignore => {}
            }
            if let Input::Reaction(emoji) = &input {
                collector.release(emoji).await;
            }
        }
    }

    fn view<C, T>(&self, pager: &Pager<MenuAction<'_, C, T>>) -> MenuView {
        let rows: Vec<String> = pager
            .current()
            .iter()
            .zip(pager::NUMBER_EMOJIS)
            .map(|(action, emoji)| format!("{} {}", emoji, action.title))
            .collect();
        let mut view = MenuView::new(format!("{}\n\n{}", self.options.header, rows.join("\n")));
        if let Some(title) = &self.options.title {
            view = view.title(title);
        }
        let footer = if pager.has_many_pages() {
            format!(
                "{} • {}",
                self.env
                    .labels
                    .page_footer(pager.page() + 1, pager.page_count()),
                self.env.labels.hint
            )
        } else {
            self.env.labels.hint.clone()
        };
        view.footer(footer)
    }
}

async fn run<C, T>(
    pager: Pager<MenuAction<'_, C, T>>,
    index: usize,
    context: C,
) -> anyhow::Result<MenuOutcome<T>> {
    let mut actions = pager.into_items();
    let action = actions.swap_remove(index);
    debug!("Sub menu dispatching action {:?}", action.title);
    (action.handler)(context).await.map(MenuOutcome::Selected)
}

fn classify_reaction<C, T>(pager: &Pager<MenuAction<'_, C, T>>, emoji: &str) -> Choice {
    match emoji {
        PREV_EMOJI => Choice::Prev,
        NEXT_EMOJI => Choice::Next,
        CANCEL_EMOJI => Choice::Cancel,
        _ => pager::row_for_emoji(emoji)
            .and_then(|row| pager.global_index(row))
            .map_or(Choice::Ignore, Choice::Pick),
    }
}

fn classify_text<C, T>(pager: &Pager<MenuAction<'_, C, T>>, text: &str) -> Choice {
    if let Some(index) = pager.items().iter().position(|a| a.matches(text)) {
        return Choice::Pick(index);
    }
    if let Some(row) = pager::parse_row(text) {
        return pager.global_index(row).map_or(Choice::Ignore, Choice::Pick);
    }
    match text.trim().to_lowercase().as_str() {
        "next" | ">" => Choice::Next,
        "prev" | "back" | "<" => Choice::Prev,
        "cancel" | "c" | "stop" => Choice::Cancel,
        _ => Choice::Ignore,
    }
}
