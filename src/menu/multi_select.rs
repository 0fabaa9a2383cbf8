use super::pager::{self, Pager};
use super::{
    Input, MenuEnv, MenuOutcome, MenuView, CANCEL_EMOJI, CHECK_EMOJI, NEXT_EMOJI, PREV_EMOJI,
    SUBMIT_EMOJI, UNCHECK_EMOJI,
};
use poise::serenity_prelude as serenity;
use serenity::{ChannelId, UserId};
use tracing::debug;

/// A checkbox row.
///
/// A `header` item is the group checkbox for every other item sharing its
/// `group`, wherever those items sit in the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    pub id: String,
    pub label: String,
    pub value: bool,
    pub group: Option<String>,
    pub header: bool,
}

impl SelectItem {
    pub fn new(id: impl Into<String>, label: impl Into<String>, value: bool) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            value,
            group: None,
            header: false,
        }
    }

    pub fn group_header(group: impl Into<String>, label: impl Into<String>, value: bool) -> Self {
        let group = group.into();
        Self {
            id: group.clone(),
            label: label.into(),
            value,
            group: Some(group),
            header: true,
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Called after every toggle, before re-render, with the index that changed.
pub type UpdateObserver = Box<dyn FnMut(&mut [SelectItem], usize) + Send>;

/// Header/member propagation across the whole collection.
///
/// Toggling a header copies its value to every member; toggling a member sets
/// the header to the AND of all members.
pub fn sync_group(items: &mut [SelectItem], changed: usize) {
    let Some(group) = items.get(changed).and_then(|i| i.group.clone()) else {
        return;
    };
    if items[changed].header {
        let value = items[changed].value;
        for item in items
            .iter_mut()
            .filter(|i| !i.header && i.group.as_ref() == Some(&group))
        {
            item.value = value;
        }
    } else {
        let all_enabled = items
            .iter()
            .filter(|i| !i.header && i.group.as_ref() == Some(&group))
            .all(|i| i.value);
        for header in items
            .iter_mut()
            .filter(|i| i.header && i.group.as_ref() == Some(&group))
        {
            header.value = all_enabled;
        }
    }
}

#[derive(Debug, Clone)]
pub struct MultiSelectOptions {
    pub header: Option<String>,
    pub page_size: usize,
    pub check_emoji: String,
    pub uncheck_emoji: String,
}

impl Default for MultiSelectOptions {
    fn default() -> Self {
        Self {
            header: None,
            page_size: pager::MAX_PAGE_SIZE,
            check_emoji: CHECK_EMOJI.to_string(),
            uncheck_emoji: UNCHECK_EMOJI.to_string(),
        }
    }
}

impl MultiSelectOptions {
    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Toggle(usize),
    Next,
    Prev,
    Submit,
    Cancel,
    Ignore,
}

/// Paged checklist; resolves to the full item list on submit.
pub struct MultiSelect<'a> {
    env: MenuEnv<'a>,
    options: MultiSelectOptions,
    items: Vec<SelectItem>,
    observers: Vec<UpdateObserver>,
}

impl<'a> MultiSelect<'a> {
    pub fn new(env: MenuEnv<'a>, options: MultiSelectOptions, items: Vec<SelectItem>) -> Self {
        Self {
            env,
            options,
            items,
            observers: Vec::new(),
        }
    }

    pub fn on_update<F>(&mut self, observer: F) -> &mut Self
    where
        F: FnMut(&mut [SelectItem], usize) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    pub async fn start(
        self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> anyhow::Result<MenuOutcome<Vec<SelectItem>>> {
        let MultiSelect {
            env,
            options,
            items,
            mut observers,
        } = self;
        let mut pager = Pager::new(items, options.page_size);

        let mut collector = env.collector(channel_id, user_id);
        collector.render(&view(&env, &options, &pager)).await?;
        let mut controls: Vec<&str> = pager.row_emojis().to_vec();
        if pager.has_many_pages() {
            controls.push(PREV_EMOJI);
            controls.push(NEXT_EMOJI);
        }
        controls.push(SUBMIT_EMOJI);
        controls.push(CANCEL_EMOJI);
        collector.decorate(&controls).await;

        loop {
            let Some(input) = collector.next().await else {
                collector.expire(&env.labels.expired_view()).await;
                return Ok(MenuOutcome::TimedOut);
            };
            let choice = match &input {
                Input::Reaction(emoji) => classify_reaction(&pager, emoji),
                Input::Text(text) => classify_text(&pager, text),
            };
            let rerender = match choice {
                Choice::Submit => {
                    collector.finish().await;
                    return Ok(MenuOutcome::Selected(pager.into_items()));
                }
                Choice::Cancel => {
                    collector.expire(&env.labels.cancelled_view()).await;
                    return Ok(MenuOutcome::Cancelled);
                }
                Choice::Toggle(index) => {
                    let items = pager.items_mut();
                    items[index].value = !items[index].value;
                    debug!("Multi select toggled {} to {}", items[index].id, items[index].value);
                    for observer in observers.iter_mut() {
                        observer(&mut *items, index);
                    }
                    true
                }
                Choice::Next => pager.next_page(),
                Choice::Prev => pager.prev_page(),
                Choice::Ignore => false,
            };
            if rerender {
                collector.render(&view(&env, &options, &pager)).await?;
            }
            if let Input::Reaction(emoji) = &input {
                collector.release(emoji).await;
            }
        }
    }
}

fn view(env: &MenuEnv<'_>, options: &MultiSelectOptions, pager: &Pager<SelectItem>) -> MenuView {
    let rows: Vec<String> = pager
        .current()
        .iter()
        .zip(pager::NUMBER_EMOJIS)
        .map(|(item, emoji)| {
            let check = if item.value {
                &options.check_emoji
            } else {
                &options.uncheck_emoji
            };
            format!("{} {} {}", emoji, check, item.label)
        })
        .collect();
    let body = rows.join("\n");
    let description = match &options.header {
        Some(header) => format!("{}\n\n{}", header, body),
        None => body,
    };
    let mut view = MenuView::new(description);
    if pager.has_many_pages() {
        view = view.footer(
            env.labels
                .page_footer(pager.page() + 1, pager.page_count()),
        );
    }
    view
}

fn classify_reaction(pager: &Pager<SelectItem>, emoji: &str) -> Choice {
    match emoji {
        PREV_EMOJI => Choice::Prev,
        NEXT_EMOJI => Choice::Next,
        SUBMIT_EMOJI => Choice::Submit,
        CANCEL_EMOJI => Choice::Cancel,
        _ => pager::row_for_emoji(emoji)
            .and_then(|row| pager.global_index(row))
            .map_or(Choice::Ignore, Choice::Toggle),
    }
}

fn classify_text(pager: &Pager<SelectItem>, text: &str) -> Choice {
    if let Some(row) = pager::parse_row(text) {
        return pager.global_index(row).map_or(Choice::Ignore, Choice::Toggle);
    }
    match text.trim().to_lowercase().as_str() {
        "next" | ">" => Choice::Next,
        "prev" | "back" | "<" => Choice::Prev,
        "done" | "submit" | "save" => Choice::Submit,
        "cancel" | "c" | "stop" => Choice::Cancel,
        _ => Choice::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::testing::{self, RecordingTarget, CHANNEL, USER};
    use crate::menu::{CollectorHub, MenuLabels};

    fn grouped_items() -> Vec<SelectItem> {
        vec![
            SelectItem::group_header("label", "Labels", false),
            SelectItem::new("CREATE_LABEL", "Created", false).in_group("label"),
            SelectItem::new("DELETE_LABEL", "Deleted", false).in_group("label"),
            SelectItem::group_header("list", "Lists", true),
            SelectItem::new("CREATE_LIST", "Created", true).in_group("list"),
        ]
    }

    #[test]
    fn test_header_toggle_sets_every_member() {
        let mut items = grouped_items();
        items[0].value = true;
        sync_group(&mut items, 0);
        assert!(items[1].value && items[2].value);
        // Other groups are untouched.
        assert!(items[4].value);
    }

    #[test]
    fn test_member_toggle_recomputes_header() {
        let mut items = grouped_items();
        items[1].value = true;
        sync_group(&mut items, 1);
        assert!(!items[0].value);
        items[2].value = true;
        sync_group(&mut items, 2);
        assert!(items[0].value);
        items[2].value = false;
        sync_group(&mut items, 2);
        assert!(!items[0].value);
    }

    #[test]
    fn test_ungrouped_items_are_ignored() {
        let mut items = vec![SelectItem::new("a", "A", true)];
        sync_group(&mut items, 0);
        sync_group(&mut items, 7);
        assert!(items[0].value);
    }

    #[tokio::test]
    async fn test_group_propagation_spans_pages() {
        let hub = CollectorHub::new();
        let target = RecordingTarget::new();
        let labels = MenuLabels::default();
        let options = MultiSelectOptions {
            page_size: 2,
            ..Default::default()
        };
        let mut select = MultiSelect::new(
            testing::env(&hub, &target, &labels, 1000),
            options,
            grouped_items(),
        );
        select.on_update(sync_group);

        let driver = async {
            let message = testing::wait_for_menu(&hub, &target).await;
            // Header on page 1, members on pages 1 and 2.
            hub.dispatch(testing::react(message, USER, "1️⃣"));
            hub.dispatch(testing::react(message, USER, NEXT_EMOJI));
            // Row 1 of page 2 is DELETE_LABEL.
            hub.dispatch(testing::say(USER, "1"));
            hub.dispatch(testing::react(message, USER, SUBMIT_EMOJI));
        };
        let (outcome, _) = tokio::join!(
            select.start(ChannelId::new(CHANNEL), UserId::new(USER)),
            driver
        );

        let items = outcome.unwrap().selected().unwrap();
        assert_eq!(items.len(), 5);
        assert!(!items[0].value, "header follows the unchecked member");
        assert!(items[1].value);
        assert!(!items[2].value);
        assert!(items[3].value && items[4].value);
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_double_press_flips_twice_and_renders_glyphs() {
        let hub = CollectorHub::new();
        let target = RecordingTarget::new();
        let labels = MenuLabels::default();
        let select = MultiSelect::new(
            testing::env(&hub, &target, &labels, 1000),
            MultiSelectOptions::default().header("Pick lists"),
            vec![SelectItem::new("l1", "Backlog", false)],
        );

        let driver = async {
            let message = testing::wait_for_menu(&hub, &target).await;
            hub.dispatch(testing::react(message, USER, "1️⃣"));
            hub.dispatch(testing::react(message, USER, "1️⃣"));
            hub.dispatch(testing::react(message, USER, "1️⃣"));
            hub.dispatch(testing::say(USER, "done"));
        };
        let (outcome, _) = tokio::join!(
            select.start(ChannelId::new(CHANNEL), UserId::new(USER)),
            driver
        );

        let items = outcome.unwrap().selected().unwrap();
        assert!(items[0].value);
        let last = target.last_view().unwrap();
        assert!(last.description.starts_with("Pick lists"));
        assert!(last.description.contains(&format!("{} Backlog", CHECK_EMOJI)));
    }

    #[tokio::test]
    async fn test_cancel_and_timeout() {
        let hub = CollectorHub::new();
        let target = RecordingTarget::new();
        let labels = MenuLabels::default();
        let select = MultiSelect::new(
            testing::env(&hub, &target, &labels, 1000),
            MultiSelectOptions::default(),
            vec![SelectItem::new("l1", "Backlog", false)],
        );
        let driver = async {
            let message = testing::wait_for_menu(&hub, &target).await;
            hub.dispatch(testing::react(message, USER, CANCEL_EMOJI));
        };
        let (outcome, _) = tokio::join!(
            select.start(ChannelId::new(CHANNEL), UserId::new(USER)),
            driver
        );
        assert_eq!(outcome.unwrap(), MenuOutcome::Cancelled);

        let select = MultiSelect::new(
            testing::env(&hub, &target, &labels, 40),
            MultiSelectOptions::default(),
            vec![SelectItem::new("l1", "Backlog", false)],
        );
        let outcome = select
            .start(ChannelId::new(CHANNEL), UserId::new(USER))
            .await
            .unwrap();
        assert_eq!(outcome, MenuOutcome::TimedOut);
        assert_eq!(target.last_view().unwrap().description, labels.expired);
    }
}
