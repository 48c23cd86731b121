use super::{AlertCard, ChannelError, StatusKind, VisualChannel};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

struct ToasterInner {
    out: Box<dyn AsyncWrite + Send + Unpin>,
    visible: HashSet<String>,
}

/// Renders alert cards as boxed blocks on the console.
pub struct TerminalToaster {
    inner: Mutex<ToasterInner>,
}

impl std::fmt::Debug for TerminalToaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalToaster").finish_non_exhaustive()
    }
}

impl TerminalToaster {
    pub fn stdout() -> Self {
        Self::with_writer(tokio::io::stdout())
    }

    pub fn with_writer<W: AsyncWrite + Send + Unpin + 'static>(out: W) -> Self {
        Self {
            inner: Mutex::new(ToasterInner {
                out: Box::new(out),
                visible: HashSet::new(),
            }),
        }
    }

    pub async fn visible(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().await.visible.iter().cloned().collect();
        ids.sort();
        ids
    }
}

fn render(card: &AlertCard) -> String {
    let lines = [card.title.as_str(), card.headline.as_str(), card.footer.as_str()];
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let mut out = format!("┌{}┐\n", "─".repeat(width + 2));
    for line in lines {
        let pad = width - line.chars().count();
        out.push_str(&format!("│ {}{} │\n", line, " ".repeat(pad)));
    }
    out.push_str(&format!("└{}┘\n", "─".repeat(width + 2)));
    out
}

#[async_trait]
impl VisualChannel for TerminalToaster {
    async fn show(&self, card: &AlertCard) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().await;
        if !inner.visible.insert(card.order_id.clone()) {
            return Ok(());
        }
        inner.out.write_all(render(card).as_bytes()).await?;
        inner.out.flush().await?;
        Ok(())
    }

    async fn remove(&self, order_id: &str) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().await;
        if inner.visible.remove(order_id) {
            inner
                .out
                .write_all(format!("  (alert for order #{} cleared)\n", order_id).as_bytes())
                .await?;
            inner.out.flush().await?;
        }
        Ok(())
    }

    async fn show_status(&self, kind: StatusKind, message: &str) -> Result<(), ChannelError> {
        let prefix = match kind {
            StatusKind::Success => "✅",
            StatusKind::Warning => "⚠️",
            StatusKind::Error => "❌",
        };
        let mut inner = self.inner.lock().await;
        inner
            .out
            .write_all(format!("{} {}\n", prefix, message).as_bytes())
            .await?;
        inner.out.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str) -> AlertCard {
        AlertCard {
            order_id: id.into(),
            title: "🍕 New Order!".into(),
            headline: "Asha • ₹599".into(),
            footer: format!("Order #{}", id),
        }
    }

    #[test]
    fn render_boxes_every_line() {
        let text = render(&card("ord-1"));
        assert!(text.contains("Asha • ₹599"));
        assert!(text.contains("Order #ord-1"));
        assert_eq!(text.lines().count(), 5);
    }

    #[tokio::test]
    async fn one_card_per_order() {
        let toaster = TerminalToaster::with_writer(tokio::io::sink());
        toaster.show(&card("a")).await.unwrap();
        toaster.show(&card("a")).await.unwrap();
        toaster.show(&card("b")).await.unwrap();
        assert_eq!(toaster.visible().await, vec!["a".to_string(), "b".to_string()]);
        toaster.remove("a").await.unwrap();
        toaster.remove("a").await.unwrap();
        assert_eq!(toaster.visible().await, vec!["b".to_string()]);
    }
}
