//! `conduit send`: one-shot requests and streaming sessions.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use conduit_application::{EngineError, MapVariableResolver, MessageReceiver, resolve_request};
use conduit_domain::{Deadline, Protocol, RequestSpec};
use conduit_infrastructure::Engine;
use conduit_infrastructure::graphql::is_subscription;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::SendArgs;
use crate::output::{drain, print_response, print_scripts};

/// How a request is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Exchange,
    Subscription,
    GrpcStream,
    WebSocket,
}

fn mode(request: &RequestSpec, stream: bool) -> Mode {
    match Protocol::from_tag(&request.protocol_tag()) {
        Some(Protocol::GraphQl) if is_subscription(&request.graphql.query) => Mode::Subscription,
        Some(Protocol::Grpc) if stream => Mode::GrpcStream,
        Some(Protocol::WebSocket) => Mode::WebSocket,
        _ => Mode::Exchange,
    }
}

/// Runs `conduit send`.
pub async fn run(engine: &Engine, args: &SendArgs, default_timeout_ms: u64) -> Result<()> {
    let request = args.to_request(default_timeout_ms)?;
    let variables = MapVariableResolver::new(args.variables()?);

    match mode(&request, args.stream) {
        Mode::Exchange => exchange(engine, request, &variables, args.include).await,
        Mode::Subscription => {
            let mut request = request;
            resolve_request(&variables, &mut request);
            let cancel = CancellationToken::new();
            let messages = engine.graphql.subscribe(&request, cancel.clone()).await?;
            follow(messages, cancel, None).await
        }
        Mode::GrpcStream => {
            let mut request = request;
            resolve_request(&variables, &mut request);
            grpc_stream(engine, &request, &args.messages).await
        }
        Mode::WebSocket => websocket(engine, request, &variables, args).await,
    }
}

async fn exchange(
    engine: &Engine,
    request: RequestSpec,
    variables: &MapVariableResolver,
    include: bool,
) -> Result<()> {
    let outcome = engine.pipeline().execute(request, variables).await?;
    let mut out = std::io::stdout().lock();
    print_response(&mut out, &outcome.response, include)?;
    print_scripts(&mut std::io::stderr().lock(), &outcome)?;
    out.flush()?;
    Ok(())
}

async fn grpc_stream(engine: &Engine, request: &RequestSpec, messages: &[String]) -> Result<()> {
    let cancel = CancellationToken::new();
    let receiver = engine.grpc.open_stream(request, cancel.clone()).await?;
    let printer = spawn_printer(receiver);

    for message in messages {
        engine
            .grpc
            .send_stream_message(message)
            .await
            .context("queueing client stream message")?;
    }
    match engine.grpc.close_stream().await {
        Ok(()) | Err(EngineError::NoActiveClientStream) => {}
        Err(e) => return Err(e.into()),
    }
    follow_printer(printer, cancel, None).await
}

async fn websocket(
    engine: &Engine,
    request: RequestSpec,
    variables: &MapVariableResolver,
    args: &SendArgs,
) -> Result<()> {
    let outcome = engine.pipeline().execute(request, variables).await?;
    print_response(&mut std::io::stdout().lock(), &outcome.response, args.include)?;
    print_scripts(&mut std::io::stderr().lock(), &outcome)?;

    let cancel = CancellationToken::new();
    let receiver = engine.websocket.read_messages(cancel.clone()).await?;
    let printer = spawn_printer(receiver);

    let body = outcome.request.body_text();
    let frames = std::iter::once(body)
        .filter(|body| !body.is_empty())
        .chain(args.messages.iter().cloned());
    for frame in frames {
        let deadline = Deadline::after_millis(outcome.request.timeout_ms);
        engine.websocket.send_text(frame, deadline).await?;
    }

    let result = follow_printer(printer, cancel, Some(Duration::from_millis(args.listen_ms))).await;
    engine.websocket.close().await;
    result
}

fn spawn_printer(messages: MessageReceiver) -> JoinHandle<std::io::Result<Option<String>>> {
    tokio::spawn(async move { drain(&mut std::io::stdout(), messages).await })
}

async fn follow(messages: MessageReceiver, cancel: CancellationToken, listen: Option<Duration>) -> Result<()> {
    follow_printer(spawn_printer(messages), cancel, listen).await
}

/// Waits for the stream to end, Ctrl-C, or `listen` to elapse.
async fn follow_printer(
    mut printer: JoinHandle<std::io::Result<Option<String>>>,
    cancel: CancellationToken,
    listen: Option<Duration>,
) -> Result<()> {
    let listen = async {
        match listen {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    let finished = tokio::select! {
        finished = &mut printer => Some(finished),
        _ = tokio::signal::ctrl_c() => None,
        () = listen => None,
    };
    let finished = match finished {
        Some(finished) => finished,
        None => {
            debug!("Stopping stream");
            cancel.cancel();
            printer.await
        }
    };
    if let Some(error) = finished.context("stream printer failed")?? {
        bail!(error);
    }
    Ok(())
}
