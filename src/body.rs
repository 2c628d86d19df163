// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Helpers for bodies that are relayed chunk by chunk between the client and the File API.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::future;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use tokio::time::{sleep, Instant, Sleep};

use crate::api::ByteStream;
use crate::error::ApiError;

/// Ends a stream with [`ApiError::Timeout`] once no chunk arrived for `idle`.
///
/// Slow transfers pass as long as they keep moving.
pub struct IdleTimeout<S> {
    inner: S,
    idle: Duration,
    deadline: Pin<Box<Sleep>>,
    done: bool,
}

impl<S> IdleTimeout<S> {
    pub fn new(inner: S, idle: Duration) -> Self {
        Self {
            inner,
            idle,
            deadline: Box::pin(sleep(idle)),
            done: false,
        }
    }
}

impl<S> Stream for IdleTimeout<S>
where
    S: Stream<Item = Result<Bytes, ApiError>> + Unpin,
{
    type Item = Result<Bytes, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                let next = Instant::now() + self.idle;
                self.deadline.as_mut().reset(next);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    self.done = true;
                    Poll::Ready(Some(Err(ApiError::Timeout)))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Moment the last chunk of a tracked upload went through.
#[derive(Debug, Clone)]
pub struct Progress(Arc<Mutex<Instant>>);

impl Progress {
    pub fn new() -> Self {
        Progress(Arc::new(Mutex::new(Instant::now())))
    }

    pub fn touch(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn last(&self) -> Instant {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Inclusive byte range of a resource, as asked for by a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// What a `Range` header asks of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range: send everything.
    Full,
    Partial(ByteRange),
    /// The range lies outside the resource.
    Unsatisfiable,
}

impl RangeRequest {
    /// Interprets a single `bytes=` range against a resource of `size` bytes.
    ///
    /// Other units, multiple ranges and syntax errors are ignored and yield [`RangeRequest::Full`].
    pub fn parse(header: &str, size: u64) -> RangeRequest {
        let spec = match header.trim().strip_prefix("bytes=") {
            Some(spec) if !spec.contains(',') => spec.trim(),
            _ => return RangeRequest::Full,
        };
        let (start, end) = match spec.split_once('-') {
            Some(bounds) => bounds,
            None => return RangeRequest::Full,
        };

        if start.is_empty() {
            // suffix: the last `n` bytes
            return match end.parse::<u64>() {
                Ok(0) => RangeRequest::Unsatisfiable,
                Ok(_) if size == 0 => RangeRequest::Unsatisfiable,
                Ok(n) => RangeRequest::Partial(ByteRange {
                    start: size.saturating_sub(n),
                    end: size - 1,
                }),
                Err(_) => RangeRequest::Full,
            };
        }

        let start = match start.parse::<u64>() {
            Ok(start) => start,
            Err(_) => return RangeRequest::Full,
        };
        let end = if end.is_empty() {
            None
        } else {
            match end.parse::<u64>() {
                Ok(end) if end >= start => Some(end),
                _ => return RangeRequest::Full,
            }
        };
        if start >= size {
            return RangeRequest::Unsatisfiable;
        }
        let last = size - 1;
        RangeRequest::Partial(ByteRange {
            start,
            end: end.map_or(last, |end| end.min(last)),
        })
    }
}

impl ByteRange {
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value of the `Content-Range` header for a resource of `size` bytes.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }

    /// Cuts the bytes of this range out of `stream`, which must start at offset 0.
    pub fn slice(self, stream: ByteStream) -> ByteStream {
        stream
            .scan(0u64, move |offset, item| {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => return future::ready(Some(Err(e))),
                };
                let begin = *offset;
                let len = chunk.len() as u64;
                *offset += len;
                if begin > self.end {
                    return future::ready(None);
                }
                let from = self.start.saturating_sub(begin).min(len) as usize;
                let to = (self.end + 1 - begin).min(len) as usize;
                future::ready(Some(Ok(chunk.slice(from..to))))
            })
            .try_filter(|chunk| future::ready(!chunk.is_empty()))
            .boxed()
    }
}
