//! Command sources: stdin and, optionally, a TCP listener.
//!
//! Each source reads newline-terminated commands and hands every line to the
//! `Dispatcher` on a blocking thread, one at a time, so lines from a single
//! source execute in order. Separate TCP clients run concurrently.

use std::io::BufRead;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::commands::{LinePiece, LineSplitter, PieceDecoder, MAX_LINE_BYTES};
use crate::dispatch::{Dispatcher, Flow};

/// Set to `true` once any source receives `quit`.
pub type QuitSignal = Arc<watch::Sender<bool>>;

/// Pieces read from stdin but not yet dispatched.
const STDIN_BACKLOG: usize = 64;

/// Next bounded piece from `reader`; `None` at EOF.
async fn next_piece<R>(reader: &mut R, splitter: &mut LineSplitter) -> std::io::Result<Option<LinePiece>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        if let Some(piece) = splitter.next_piece() {
            return Ok(Some(piece));
        }
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(splitter.finish());
        }
        let taken = splitter.feed(available);
        reader.consume(taken);
    }
}

/// Read commands until EOF or `quit`. A line is never buffered past
/// [`MAX_LINE_BYTES`]; longer input is handled piece by piece.
pub async fn serve_lines<R>(mut reader: R, dispatcher: Arc<Dispatcher>, quit: QuitSignal) -> anyhow::Result<Flow>
where
    R: AsyncBufRead + Unpin,
{
    let mut splitter = LineSplitter::new(MAX_LINE_BYTES);
    let mut decoder = PieceDecoder::default();
    let mut stop = quit.subscribe();
    loop {
        let piece = tokio::select! {
            piece = next_piece(&mut reader, &mut splitter) => piece?,
            _ = stop.changed() => return Ok(Flow::Quit),
        };
        let Some(piece) = piece else {
            return Ok(Flow::Continue);
        };
        if dispatch_piece(&dispatcher, &mut decoder, &piece, &quit).await? == Flow::Quit {
            return Ok(Flow::Quit);
        }
    }
}

/// Stdin is read on a plain thread: a pending blocking read would otherwise
/// keep the runtime from shutting down after `quit`.
pub async fn serve_stdin(dispatcher: Arc<Dispatcher>, quit: QuitSignal) -> anyhow::Result<Flow> {
    let (tx, mut rx) = mpsc::channel::<LinePiece>(STDIN_BACKLOG);
    std::thread::Builder::new()
        .name("omnivox-stdin".into())
        .spawn(move || {
            let mut stdin = std::io::stdin().lock();
            let mut splitter = LineSplitter::new(MAX_LINE_BYTES);
            loop {
                while let Some(piece) = splitter.next_piece() {
                    if tx.blocking_send(piece).is_err() {
                        return;
                    }
                }
                let taken = match stdin.fill_buf() {
                    Ok([]) => break,
                    Ok(available) => splitter.feed(available),
                    Err(e) => {
                        warn!("stdin read error: {e}");
                        break;
                    }
                };
                stdin.consume(taken);
            }
            if let Some(piece) = splitter.finish() {
                let _ = tx.blocking_send(piece);
            }
        })?;

    let mut decoder = PieceDecoder::default();
    let mut stop = quit.subscribe();
    loop {
        let piece = tokio::select! {
            piece = rx.recv() => piece,
            _ = stop.changed() => return Ok(Flow::Quit),
        };
        let Some(piece) = piece else {
            return Ok(Flow::Continue);
        };
        if dispatch_piece(&dispatcher, &mut decoder, &piece, &quit).await? == Flow::Quit {
            return Ok(Flow::Quit);
        }
    }
}

async fn dispatch_piece(
    dispatcher: &Arc<Dispatcher>,
    decoder: &mut PieceDecoder,
    piece: &LinePiece,
    quit: &QuitSignal,
) -> anyhow::Result<Flow> {
    let Some(decoded) = decoder.decode(piece) else {
        return Ok(Flow::Continue);
    };
    let d = Arc::clone(dispatcher);
    let flow = tokio::task::spawn_blocking(move || d.run(decoded)).await?;
    if flow == Flow::Quit {
        let _ = quit.send(true);
    }
    Ok(flow)
}

/// Accept clients until `quit` fires.
pub async fn serve_tcp(
    bind_address: &str,
    port: u16,
    dispatcher: Arc<Dispatcher>,
    quit: QuitSignal,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind((bind_address, port)).await?;
    info!(address = bind_address, port, "listening for commands");

    let mut stop = quit.subscribe();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("new connection error: {e}");
                        continue;
                    }
                };
                info!(%peer, "client connected");
                let d = Arc::clone(&dispatcher);
                let q = Arc::clone(&quit);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, d, q).await {
                        warn!(%peer, "read error: {e}");
                    }
                    info!(%peer, "client disconnected");
                });
            }
            _ = stop.changed() => break,
        }
    }
    Ok(())
}

async fn serve_connection(stream: TcpStream, dispatcher: Arc<Dispatcher>, quit: QuitSignal) -> anyhow::Result<()> {
    let (reader, _writer) = stream.into_split();
    serve_lines(BufReader::new(reader), dispatcher, quit).await?;
    Ok(())
}
