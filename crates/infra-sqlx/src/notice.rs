// PostgreSQL notice capture
//
// sqlx surfaces NoticeResponse messages only as tracing events under the
// `sqlx::postgres::notice` target, emitted on the task that awaits the
// statement. `PgNoticeLayer` copies them into that statement's buffer.

use dbcontext_core::port::Notice;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

pub const NOTICE_TARGET: &str = "sqlx::postgres::notice";

tokio::task_local! {
    static CAPTURED: RefCell<Vec<Notice>>;
}

/// Subscriber layer that hands server notices to the running `PgHandle`
pub struct PgNoticeLayer;

impl PgNoticeLayer {
    /// The layer behind its own filter, so the application's filter for
    /// other layers can keep `sqlx` quiet.
    pub fn filtered<S>() -> impl Layer<S>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        PgNoticeLayer.with_filter(filter_fn(|meta| meta.target() == NOTICE_TARGET))
    }
}

impl<S: Subscriber> Layer<S> for PgNoticeLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != NOTICE_TARGET {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let notice = Notice::new(severity(event.metadata().level()), visitor.0);

        // outside a running statement there is no session to deliver to
        let _ = CAPTURED.try_with(|captured| captured.borrow_mut().push(notice));
    }
}

/// sqlx maps the server severity onto a tracing level; map it back
fn severity(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "NOTICE",
        Level::DEBUG => "DEBUG",
        _ => "LOG",
    }
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0 = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

/// Run `work`, returning its output with the notices raised while it ran
pub(crate) async fn capture_notices<F: Future>(work: F) -> (F::Output, Vec<Notice>) {
    CAPTURED
        .scope(RefCell::new(Vec::new()), async move {
            let output = work.await;
            (output, CAPTURED.with(|captured| captured.take()))
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[tokio::test]
    async fn test_notices_are_captured_inside_statement_scope() {
        let subscriber = tracing_subscriber::registry().with(PgNoticeLayer::filtered());
        let _guard = tracing::subscriber::set_default(subscriber);

        let ((), notices) = capture_notices(async {
            tracing::info!(target: NOTICE_TARGET, message = "hello");
            tracing::warn!(target: NOTICE_TARGET, message = "careful");
            tracing::info!(target: "other", message = "ignored");
        })
        .await;
        tracing::info!(target: NOTICE_TARGET, message = "outside");

        assert_eq!(
            notices,
            vec![Notice::new("NOTICE", "hello"), Notice::new("WARNING", "careful")]
        );
    }

    #[tokio::test]
    async fn test_nothing_captured_without_layer() {
        let ((), notices) = capture_notices(async {
            tracing::info!(target: NOTICE_TARGET, message = "hello");
        })
        .await;
        assert!(notices.is_empty());
    }
}
