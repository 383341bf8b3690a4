use std::io::Write as _;
use std::sync::Arc;

use agent_stream::backend::http::HttpRunBackend;
use agent_stream::init_observability;
use agent_stream::prelude::*;
use tokio::sync::Notify;

struct PrintCallbacks {
    closed: Arc<Notify>,
}

impl StreamCallbacks for PrintCallbacks {
    fn on_message(&self, message: FinalizedMessage) {
        println!("\n[{:?}] {}", message.message().kind, message.message_id());
    }

    fn on_error(&self, message: &str) {
        eprintln!("\nstream error: {message}");
    }

    fn on_assistant_chunk(&self, content: &str) {
        print!("{content}");
        let _ = std::io::stdout().flush();
    }

    fn on_close(&self, status: StreamStatus) {
        println!("\nrun finished: {status}");
        self.closed.notify_one();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), StreamError> {
    init_observability();

    let mut args = std::env::args().skip(1);
    let (Some(thread_id), Some(run_id)) = (args.next(), args.next()) else {
        eprintln!("usage: http_stream <thread-id> <run-id>");
        return Ok(());
    };

    let closed = Arc::new(Notify::new());
    let supervisor = StreamSupervisor::builder(thread_id)
        .backend(Arc::new(HttpRunBackend::from_env()?))
        .callbacks(Arc::new(PrintCallbacks {
            closed: closed.clone(),
        }))
        .config(StreamConfig::from_env()?)
        .build()?;

    supervisor.start_streaming(run_id).await?;
    if supervisor.status().is_terminal() {
        return Ok(());
    }

    tokio::select! {
        _ = closed.notified() => {}
        _ = tokio::signal::ctrl_c() => {
            supervisor.stop_streaming().await?;
        }
    }
    Ok(())
}
