//! Scripted dispatcher for exercising the middleware without a network.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::client::{DispatchRequest, DispatchResponse, Dispatcher};
use crate::error::ApiError;

/// Replays queued responses in order and records every request it saw.
#[derive(Default)]
pub struct FakeDispatcher {
    responses: Mutex<VecDeque<Result<DispatchResponse, ApiError>>>,
    log: Mutex<Vec<DispatchRequest>>,
}

impl FakeDispatcher {
    pub fn push(&self, response: Result<DispatchResponse, ApiError>) {
        lock(&self.responses).push_back(response);
    }

    #[must_use]
    pub fn log(&self) -> Vec<DispatchRequest> {
        lock(&self.log).clone()
    }
}

#[async_trait]
impl Dispatcher for FakeDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, ApiError> {
        lock(&self.log).push(request);
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| {
                Err(ApiError::Request {
                    message: "no scripted response".to_string(),
                })
            })
    }
}

#[must_use]
pub fn json_response(
    status: u16,
    body: &serde_json::Value,
) -> Result<DispatchResponse, ApiError> {
    Ok(DispatchResponse {
        status,
        body: body.to_string().into_bytes(),
    })
}

#[must_use]
pub fn status_response(status: u16) -> Result<DispatchResponse, ApiError> {
    Ok(DispatchResponse {
        status,
        body: Vec::new(),
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
