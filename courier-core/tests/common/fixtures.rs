// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Test Fixtures
//!
//! In-memory stand-ins for the REST collaborator, the upload store and the
//! job runner.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use courier_core::conversation::{
    ApiError, AttachmentResponse, ConversationApi, ConversationRequest, ConversationResponse,
    ParticipantResponse, ParticipantSessionResponse,
};
use courier_core::attachment::UserNotice;
use courier_core::job::JobContext;
use courier_core::{
    CourierError, CourierResult, Job, JobRunner, UploadError, UploadSink, UserNotifier,
};

// ============================================================
// Conversation API
// ============================================================

/// Builds a server view of a conversation from `(user_id, session_id)`
/// pairs.
pub fn conversation_response(
    conversation_id: &str,
    category: &str,
    sessions: &[(&str, &str)],
) -> ConversationResponse {
    let mut users: Vec<&str> = Vec::new();
    for (user, _) in sessions {
        if !users.contains(user) {
            users.push(user);
        }
    }
    ConversationResponse {
        conversation_id: conversation_id.to_string(),
        name: None,
        category: category.to_string(),
        participants: users
            .into_iter()
            .map(|user_id| ParticipantResponse {
                user_id: user_id.to_string(),
                role: String::new(),
                created_at: 0,
            })
            .collect(),
        participant_sessions: Some(
            sessions
                .iter()
                .map(|(user_id, session_id)| ParticipantSessionResponse {
                    user_id: user_id.to_string(),
                    session_id: session_id.to_string(),
                })
                .collect(),
        ),
    }
}

/// Scriptable [`ConversationApi`] with call counters.
#[derive(Default)]
pub struct FakeApi {
    conversations: Mutex<HashMap<String, ConversationResponse>>,
    fail_create: AtomicBool,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
    attachment_calls: AtomicUsize,
    attachment_created_at: Mutex<Option<i64>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets what the server reports for a conversation.
    pub fn set_conversation(&self, response: ConversationResponse) {
        self.conversations
            .lock()
            .insert(response.conversation_id.clone(), response);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Overrides the creation time of issued attachment slots.
    pub fn set_attachment_created_at(&self, created_at: i64) {
        *self.attachment_created_at.lock() = Some(created_at);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn attachment_calls(&self) -> usize {
        self.attachment_calls.load(Ordering::SeqCst)
    }
}

impl ConversationApi for FakeApi {
    fn create_conversation(
        &self,
        request: &ConversationRequest,
    ) -> Result<ConversationResponse, ApiError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ApiError::Server {
                code: 500,
                description: "create failed".into(),
            });
        }
        let known = self
            .conversations
            .lock()
            .get(&request.conversation_id)
            .cloned();
        Ok(known.unwrap_or_else(|| ConversationResponse {
            conversation_id: request.conversation_id.clone(),
            name: None,
            category: request.category.clone(),
            participants: Vec::new(),
            participant_sessions: None,
        }))
    }

    fn get_conversation(&self, conversation_id: &str) -> Result<ConversationResponse, ApiError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.conversations
            .lock()
            .get(conversation_id)
            .cloned()
            .ok_or(ApiError::Status(404))
    }

    fn request_attachment(&self) -> Result<AttachmentResponse, ApiError> {
        let n = self.attachment_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let created_at = (*self.attachment_created_at.lock()).unwrap_or_else(unix_now);
        Ok(AttachmentResponse {
            attachment_id: format!("attachment-{n}"),
            upload_url: format!("https://uploads.test/attachment-{n}"),
            view_url: Some(format!("https://cdn.test/attachment-{n}")),
            created_at,
        })
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

// ============================================================
// Upload sink
// ============================================================

/// One body received by [`RecordingSink`].
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub url: String,
    pub content_length: u64,
    pub body: Vec<u8>,
    /// Whether the body was read to its end.
    pub completed: bool,
}

type Hook = Box<dyn FnOnce() + Send>;

/// [`UploadSink`] that keeps every body in memory.
#[derive(Default)]
pub struct RecordingSink {
    uploads: Mutex<Vec<RecordedUpload>>,
    hook: Mutex<Option<(usize, Hook)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `hook` once, as soon as `bytes` of a body have been read.
    pub fn after_bytes<F>(&self, bytes: usize, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.hook.lock() = Some((bytes, Box::new(hook)));
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().clone()
    }

    fn fire_hook(&self, received: usize) {
        let due = {
            let mut hook = self.hook.lock();
            match hook.as_ref() {
                Some((threshold, _)) if received >= *threshold => hook.take(),
                _ => None,
            }
        };
        if let Some((_, hook)) = due {
            hook();
        }
    }
}

impl UploadSink for RecordingSink {
    fn put(
        &self,
        url: &str,
        mut body: Box<dyn Read + Send>,
        content_length: u64,
    ) -> Result<(), UploadError> {
        let mut received = Vec::new();
        let mut buf = vec![0u8; 16 * 1024];
        let result = loop {
            match body.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    received.extend_from_slice(&buf[..n]);
                    self.fire_hook(received.len());
                }
                Err(e) => break Err(UploadError::Io(e)),
            }
        };

        self.uploads.lock().push(RecordedUpload {
            url: url.to_string(),
            content_length,
            body: received,
            completed: result.is_ok(),
        });
        result
    }
}

/// [`UserNotifier`] that remembers every notice.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<UserNotice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<UserNotice> {
        self.notices.lock().clone()
    }
}

impl UserNotifier for RecordingNotifier {
    fn notify(&self, notice: UserNotice) {
        self.notices.lock().push(notice);
    }
}

// ============================================================
// Job runner
// ============================================================

/// [`JobRunner`] that records what ran and replays scripted results.
#[derive(Default)]
pub struct RecordingRunner {
    runs: Mutex<Vec<String>>,
    scripted: Mutex<HashMap<String, VecDeque<CourierResult<()>>>>,
    blocked: Mutex<HashSet<String>>,
    cancelled: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    run_time: Mutex<Duration>,
    cancel_on_return: Mutex<HashSet<String>>,
    followups: Mutex<HashMap<String, Job>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results returned by the next runs of `job_id`, in order. Once
    /// exhausted the job succeeds.
    pub fn script(&self, job_id: &str, results: Vec<CourierResult<()>>) {
        self.scripted
            .lock()
            .insert(job_id.to_string(), results.into_iter().collect());
    }

    /// Makes runs of `job_id` block until released or cancelled.
    pub fn block(&self, job_id: &str) {
        self.blocked.lock().insert(job_id.to_string());
    }

    pub fn release(&self, job_id: &str) {
        self.blocked.lock().remove(job_id);
    }

    /// Cancels the run's token right before `job_id` returns, as a cancel
    /// arriving after the work completed would.
    pub fn cancel_on_return(&self, job_id: &str) {
        self.cancel_on_return.lock().insert(job_id.to_string());
    }

    /// Makes `job_id` submit `followup` from its run.
    pub fn follow_with(&self, job_id: &str, followup: Job) {
        self.followups.lock().insert(job_id.to_string(), followup);
    }

    /// Makes every run take at least `duration`.
    pub fn set_run_time(&self, duration: Duration) {
        *self.run_time.lock() = duration;
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }

    pub fn run_count(&self, job_id: &str) -> usize {
        self.runs.lock().iter().filter(|id| *id == job_id).count()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    pub fn failed(&self) -> Vec<String> {
        self.failed.lock().clone()
    }

    /// Most jobs ever observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Waits until `job_id` has started at least once.
    pub fn wait_started(&self, job_id: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.run_count(job_id) > 0 {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }
}

impl JobRunner for RecordingRunner {
    fn run(&self, job: &Job, ctx: &JobContext) -> CourierResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.runs.lock().push(job.job_id.clone());

        let result = (|| -> CourierResult<()> {
            while self.blocked.lock().contains(&job.job_id) {
                ctx.check()?;
                thread::sleep(Duration::from_millis(2));
            }
            let run_time = *self.run_time.lock();
            if !run_time.is_zero() {
                ctx.cancel_token().sleep(run_time)?;
            }
            if let Some(followup) = self.followups.lock().get(&job.job_id) {
                ctx.submit(followup.clone());
            }
            let result = self
                .scripted
                .lock()
                .get_mut(&job.job_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Ok(()));
            if self.cancel_on_return.lock().contains(&job.job_id) {
                ctx.cancel_token().cancel();
            }
            result
        })();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn on_cancelled(&self, job: &Job) {
        self.cancelled.lock().push(job.job_id.clone());
    }

    fn on_failed(&self, job: &Job, _error: &CourierError) {
        self.failed.lock().push(job.job_id.clone());
    }
}
