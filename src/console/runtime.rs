// Console client: stdin input loop plus a background listener for server
// replies and pushed messages

use anyhow::Result;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::console::controllers::build_tree;
use crate::console::render::{render_event, ConsoleLine};
use crate::console::tree::{CommandTree, Dispatch};
use crate::msgserver::client::{self, ClientReceiver, ClientSender, ServerEvent};
use crate::msgserver::message::{AuthPayload, Request, ResponseAction};

/// Where console output goes
#[derive(Clone)]
pub enum Console {
    Stdout,
    /// Collects lines in memory
    Capture(Arc<Mutex<Vec<ConsoleLine>>>),
}

impl Console {
    pub fn capture() -> Self {
        Console::Capture(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn show(&self, line: ConsoleLine) {
        match self {
            Console::Stdout => println!("{}", line),
            Console::Capture(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(line);
                }
            }
        }
    }

    pub fn show_all(&self, lines: impl IntoIterator<Item = ConsoleLine>) {
        for line in lines {
            self.show(line);
        }
    }

    /// Captured lines so far; always empty for `Stdout`
    pub fn captured(&self) -> Vec<ConsoleLine> {
        match self {
            Console::Stdout => Vec::new(),
            Console::Capture(lines) => lines.lock().map(|l| l.clone()).unwrap_or_default(),
        }
    }
}

/// State shared by command handlers and the listener task
pub struct ClientContext {
    sender: ClientSender,
    console: Console,
    help: OnceLock<Vec<String>>,
    shutdown: CancellationToken,
}

impl ClientContext {
    pub fn new(sender: ClientSender, console: Console) -> Self {
        Self {
            sender,
            console,
            help: OnceLock::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn sender(&self) -> &ClientSender {
        &self.sender
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub async fn request(&self, request: Request) -> Result<()> {
        self.sender.send(request).await
    }

    pub(crate) fn set_help(&self, lines: Vec<String>) {
        if self.help.set(lines).is_err() {
            tracing::debug!("Help text already set");
        }
    }

    pub fn help_lines(&self) -> &[String] {
        self.help.get().map(Vec::as_slice).unwrap_or_default()
    }

    /// Render a server event, remembering the token from `auth_success`
    pub async fn handle_event(&self, event: &ServerEvent) {
        if let ServerEvent::Response(response) = event {
            if response.action == ResponseAction::AuthSuccess {
                if let Some(auth) = response.payload::<AuthPayload>() {
                    self.sender.set_token(auth.token).await;
                }
            }
        }
        self.console.show_all(render_event(event));
    }
}

/// Print server events until cancelled or the server hangs up
pub fn spawn_listener(mut receiver: ClientReceiver, ctx: Arc<ClientContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                event = receiver.recv() => match event {
                    Ok(Some(event)) => ctx.handle_event(&event).await,
                    Ok(None) => {
                        ctx.console.show(ConsoleLine::error("Connection closed by server"));
                        ctx.shutdown.cancel();
                        break;
                    }
                    Err(e) => {
                        ctx.console.show(ConsoleLine::error(format!("{:#}", e)));
                        ctx.shutdown.cancel();
                        break;
                    }
                }
            }
        }
        tracing::debug!("Listener stopped");
    })
}

/// Feed one typed line to the command tree and report the outcome
pub async fn handle_line(tree: &CommandTree, ctx: &ClientContext, line: &str) {
    match tree.dispatch(line).await {
        Ok(Dispatch::Empty) | Ok(Dispatch::Invoked { .. }) => {}
        Ok(Dispatch::Choices {
            options, unmatched, ..
        }) => {
            if let Some(token) = unmatched {
                ctx.console
                    .show(ConsoleLine::error(format!("Unknown command: {}", token)));
            }
            ctx.console.show(ConsoleLine::info(format!(
                "Available: {}",
                options.join(", ")
            )));
        }
        Err(e) => ctx.console.show(ConsoleLine::error(e.to_string())),
    }
}

/// Read lines until EOF, `/quit` or the connection drops
pub async fn input_loop(input: impl AsyncBufRead + Unpin, tree: &CommandTree, ctx: &ClientContext) {
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                handle_line(tree, ctx, &line).await;
                if ctx.shutdown.is_cancelled() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                ctx.console
                    .show(ConsoleLine::error(format!("Error reading input: {}", e)));
                break;
            }
        }
    }
}

/// Run an interactive session against an already connected server
pub async fn run_session(
    sender: ClientSender,
    receiver: ClientReceiver,
    input: impl AsyncBufRead + Unpin,
    console: Console,
) -> Result<()> {
    let ctx = Arc::new(ClientContext::new(sender, console));
    let tree = build_tree(&ctx);

    let listener = spawn_listener(receiver, ctx.clone());
    input_loop(input, &tree, &ctx).await;

    ctx.shutdown.cancel();
    if let Err(e) = listener.await {
        tracing::warn!("Listener task failed: {}", e);
    }
    if let Err(e) = ctx.sender.close().await {
        tracing::debug!("Close failed: {:#}", e);
    }
    Ok(())
}

/// Connect and run the console on stdin/stdout
pub async fn run(config: ClientConfig) -> Result<()> {
    eprintln!("Connecting to {}...", config.server_addr);
    let (sender, receiver) = client::connect(&config.server_addr).await?;

    eprintln!("✓ Secure session established");
    eprintln!("Type /help for commands, /quit to exit.");
    eprintln!();

    let stdin = BufReader::new(tokio::io::stdin());
    run_session(sender, receiver, stdin, Console::Stdout).await?;

    eprintln!("Disconnected");
    Ok(())
}
