use super::{Input, MenuEnv, MenuOutcome, MenuView, CANCEL_EMOJI, NO_EMOJI, YES_EMOJI};
use poise::serenity_prelude as serenity;
use serenity::{ChannelId, UserId};

/// One-shot questions that share the menu collector.
#[derive(Clone, Copy)]
pub struct Prompter<'a> {
    env: MenuEnv<'a>,
}

impl<'a> Prompter<'a> {
    pub fn new(env: MenuEnv<'a>) -> Self {
        Self { env }
    }

    /// Yes/no question answered with ✅/❌ or by typing yes/no.
    pub async fn confirm(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        view: MenuView,
    ) -> anyhow::Result<MenuOutcome<bool>> {
        let mut collector = self.env.collector(channel_id, user_id);
        collector.render(&view).await?;
        collector.decorate(&[YES_EMOJI, NO_EMOJI]).await;

        loop {
            let Some(input) = collector.next().await else {
                collector.expire(&self.env.labels.expired_view()).await;
                return Ok(MenuOutcome::TimedOut);
            };
            let answer = match &input {
                Input::Reaction(emoji) if emoji == YES_EMOJI => Some(true),
                Input::Reaction(emoji) if emoji == NO_EMOJI => Some(false),
                Input::Text(text) => parse_yes_no(text),
                Input::Reaction(_) => None,
            };
            if let Some(answer) = answer {
                collector.finish().await;
                return Ok(MenuOutcome::Selected(answer));
            }
        }
    }

    /// Waits for the user's next message in the channel.
    ///
    /// Typing `cancel` or pressing 🛑 gives up.
    pub async fn get_input(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        view: MenuView,
    ) -> anyhow::Result<MenuOutcome<String>> {
        let mut collector = self.env.collector(channel_id, user_id);
        collector.render(&view).await?;
        collector.decorate(&[CANCEL_EMOJI]).await;

        loop {
            match collector.next().await {
                None => {
                    collector.expire(&self.env.labels.expired_view()).await;
                    return Ok(MenuOutcome::TimedOut);
                }
                Some(Input::Reaction(emoji)) if emoji == CANCEL_EMOJI => {
                    collector.expire(&self.env.labels.cancelled_view()).await;
                    return Ok(MenuOutcome::Cancelled);
                }
                Some(Input::Reaction(_)) => {}
                Some(Input::Text(text)) => {
                    if text.trim().eq_ignore_ascii_case("cancel") {
                        collector.expire(&self.env.labels.cancelled_view()).await;
                        return Ok(MenuOutcome::Cancelled);
                    }
                    collector.finish().await;
                    return Ok(MenuOutcome::Selected(text));
                }
            }
        }
    }
}

fn parse_yes_no(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" | "confirm" => Some(true),
        "no" | "n" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::testing::{self, RecordingTarget, CHANNEL, STRANGER, USER};
    use crate::menu::{CollectorHub, MenuLabels};

    #[tokio::test]
    async fn test_confirm_by_reaction_and_text() {
        let hub = CollectorHub::new();
        let target = RecordingTarget::new();
        let labels = MenuLabels::default();
        let prompter = Prompter::new(testing::env(&hub, &target, &labels, 1000));

        let driver = async {
            let message = testing::wait_for_menu(&hub, &target).await;
            hub.dispatch(testing::react(message, STRANGER, YES_EMOJI));
            hub.dispatch(testing::react(message, USER, NO_EMOJI));
        };
        let (answer, _) = tokio::join!(
            prompter.confirm(
                ChannelId::new(CHANNEL),
                UserId::new(USER),
                MenuView::new("Delete?")
            ),
            driver
        );
        assert_eq!(answer.unwrap(), MenuOutcome::Selected(false));

        let driver = async {
            testing::wait_for_menu(&hub, &target).await;
            hub.dispatch(testing::say(USER, "maybe"));
            hub.dispatch(testing::say(USER, "Yes"));
        };
        let (answer, _) = tokio::join!(
            prompter.confirm(
                ChannelId::new(CHANNEL),
                UserId::new(USER),
                MenuView::new("Delete?")
            ),
            driver
        );
        assert_eq!(answer.unwrap(), MenuOutcome::Selected(true));
    }

    #[tokio::test]
    async fn test_get_input_returns_text_or_cancels() {
        let hub = CollectorHub::new();
        let target = RecordingTarget::new();
        let labels = MenuLabels::default();
        let prompter = Prompter::new(testing::env(&hub, &target, &labels, 1000));

        let driver = async {
            testing::wait_for_menu(&hub, &target).await;
            hub.dispatch(testing::say(USER, "New card name"));
        };
        let (answer, _) = tokio::join!(
            prompter.get_input(
                ChannelId::new(CHANNEL),
                UserId::new(USER),
                MenuView::new("Name?")
            ),
            driver
        );
        assert_eq!(answer.unwrap(), MenuOutcome::Selected("New card name".into()));

        let driver = async {
            testing::wait_for_menu(&hub, &target).await;
            hub.dispatch(testing::say(USER, "cancel"));
        };
        let (answer, _) = tokio::join!(
            prompter.get_input(
                ChannelId::new(CHANNEL),
                UserId::new(USER),
                MenuView::new("Name?")
            ),
            driver
        );
        assert_eq!(answer.unwrap(), MenuOutcome::Cancelled);
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_confirm_times_out() {
        let hub = CollectorHub::new();
        let target = RecordingTarget::new();
        let labels = MenuLabels::default();
        let prompter = Prompter::new(testing::env(&hub, &target, &labels, 30));
        let answer = prompter
            .confirm(
                ChannelId::new(CHANNEL),
                UserId::new(USER),
                MenuView::new("Delete?"),
            )
            .await
            .unwrap();
        assert_eq!(answer, MenuOutcome::TimedOut);
    }
}
