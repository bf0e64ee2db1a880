//! Console transport: stdin lines become inbound events for one conversation.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use parley_conversation::{ConversationEngine, TerminationCallback, TerminationReason};
use parley_core::{InboundEvent, OutboundEvent, OutboundKind};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use super::build_engine;

const SENDER: &str = "console";

/// Input parameters for the Chat command strategy.
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Conversation to continue (a fresh id is generated if not provided)
    pub conversation_id: Option<String>,
    /// Optional single message to send (non-interactive mode)
    pub message: Option<String>,
    /// Optional model override
    pub model: Option<String>,
}

/// Strategy for executing the Chat command.
///
/// Interactive mode runs the engine's `serve` loop and treats the console
/// as the transport. `/reset` restarts the conversation keeping its
/// history, `/clear` also discards the history.
#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

struct AnnounceTermination;

#[async_trait]
impl TerminationCallback for AnnounceTermination {
    async fn on_terminate(&self, conversation_id: &str, reason: TerminationReason) {
        info!("Conversation {conversation_id} ended: {reason}");
    }
}

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let engine = Arc::new(
            build_engine(input.model)?.with_termination_callback(Arc::new(AnnounceTermination)),
        );
        let conversation_id = input
            .conversation_id
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        if let Some(message) = input.message {
            let event = InboundEvent::new(conversation_id.as_str(), SENDER, message);
            for reply in engine.handle(event).await {
                print_reply(&reply);
            }
            return Ok(());
        }

        run_interactive(engine, &conversation_id).await
    }
}

async fn run_interactive(engine: Arc<ConversationEngine>, conversation_id: &str) -> anyhow::Result<()> {
    let (inbound_tx, inbound_rx) = mpsc::channel(8);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
    let server = tokio::spawn(Arc::clone(&engine).serve(inbound_rx, outbound_tx));

    println!("=== Conversation: {conversation_id} ===");
    println!("Type 'exit' to quit, '/reset' to restart, '/clear' to restart with empty history.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "exit" | "quit" | "q" => break,
            "/reset" | "/clear" => {
                let clear = line == "/clear";
                if engine.reset(conversation_id, clear).await {
                    println!("(conversation reset)\n");
                } else {
                    println!("(nothing to reset)\n");
                }
                continue;
            }
            _ => {}
        }

        inbound_tx
            .send(InboundEvent::new(conversation_id, SENDER, line))
            .await?;
        match outbound_rx.recv().await {
            Some(reply) => print_reply(&reply),
            None => break,
        }
    }

    drop(inbound_tx);
    server.await?;

    if let Some(conversation) = engine.snapshot(conversation_id).await {
        println!(
            "\nSession ended. Interactions: {}, messages: {}",
            conversation.interaction_count,
            conversation.messages.len()
        );
    }
    Ok(())
}

fn print_reply(reply: &OutboundEvent) {
    match reply.kind {
        OutboundKind::Reply => println!("\n{}\n", reply.content),
        OutboundKind::Rejection => println!("\n[rejected] {}\n", reply.content),
        OutboundKind::Error => eprintln!("\n[error] {}\n", reply.content),
    }
    if let Some(reason) = reply.metadata.get("termination_reason").and_then(|r| r.as_str()) {
        println!("(conversation ended: {reason}; type /reset to continue)\n");
    }
}
