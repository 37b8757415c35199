use futures_util::stream::{self, Stream, StreamExt};
use prosearch_core::{Error, Result, TextStream};
use std::pin::Pin;

/// What one line of a streaming response means.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Line {
    Skip,
    Text(String),
    Done,
}

struct State<S, F> {
    bytes: Pin<Box<S>>,
    buf: Vec<u8>,
    decode: F,
    eof: bool,
    finished: bool,
}

/// Turn a chunked byte body into text deltas, one `decode` call per line.
///
/// Lines are split on `\n` over the raw bytes, so multi-byte characters split across chunks
/// survive. A trailing line without a newline is decoded at end of body. The stream ends at
/// the first [`Line::Done`] or error.
pub(crate) fn text_stream<S, B, E, F>(bytes: S, decode: F) -> TextStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    F: FnMut(&str) -> Result<Line> + Send + 'static,
{
    let state = State {
        bytes: Box::pin(bytes),
        buf: Vec::new(),
        decode,
        eof: false,
        finished: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }
            let newline = st.buf.iter().position(|b| *b == b'\n');
            let raw: Option<Vec<u8>> = match newline {
                Some(pos) => Some(st.buf.drain(..=pos).collect()),
                None if st.eof && !st.buf.is_empty() => Some(std::mem::take(&mut st.buf)),
                None if st.eof => return None,
                None => None,
            };
            if let Some(raw) = raw {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match (st.decode)(line) {
                    Ok(Line::Skip) => continue,
                    Ok(Line::Text(t)) if t.is_empty() => continue,
                    Ok(Line::Text(t)) => return Some((Ok(t), st)),
                    Ok(Line::Done) => return None,
                    Err(e) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                }
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(Error::Llm(format!("stream read failed: {e}"))), st));
                }
                None => st.eof = true,
            }
        }
    })
    .boxed()
}
