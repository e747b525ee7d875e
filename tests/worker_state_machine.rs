use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use imap_sync_worker::config::WorkerConfig;
use imap_sync_worker::imap::{AsyncImapOps, IdleOutcome, ImapClient, ImapError, UnsolicitedKind};
use imap_sync_worker::process_uid::ProcessUid;
use imap_sync_worker::user::{AuthMethod, ProviderConfig, User, UserId};
use imap_sync_worker::user_store::{UserPatch, UserStore, UserStoreError};
use imap_sync_worker::worker::{DispatchNotifier, SessionConnector, UserWorker, WorkerError};

#[derive(Debug, Default)]
struct FakeSession {
    folders: Vec<&'static str>,
    uid_validity: String,
    date_uids: Mutex<Vec<u32>>,
    uid_range_responses: Mutex<HashMap<String, Vec<u32>>>,
    idle_script: Mutex<VecDeque<IdleOutcome>>,
}

#[async_trait]
impl AsyncImapOps for FakeSession {
    async fn list_folders(&self) -> Result<Vec<String>, ImapError> {
        Ok(self.folders.iter().map(|s| s.to_string()).collect())
    }

    async fn examine(&self, _name: &str) -> Result<(), ImapError> {
        Ok(())
    }

    async fn status_uid_validity(&self, _folder: &str) -> Result<String, ImapError> {
        Ok(self.uid_validity.clone())
    }

    async fn uid_search(&self, criteria: &str) -> Result<Vec<u32>, ImapError> {
        if criteria.starts_with("SINCE") {
            return Ok(self.date_uids.lock().unwrap().clone());
        }
        Ok(self.uid_range_responses.lock().unwrap().get(criteria).cloned().unwrap_or_default())
    }

    async fn idle(&self, _timeout: Duration, stop: &Notify) -> Result<IdleOutcome, ImapError> {
        let next = self.idle_script.lock().unwrap().pop_front();
        match next {
            Some(outcome) => Ok(outcome),
            None => {
                stop.notified().await;
                Ok(IdleOutcome::Interrupted)
            }
        }
    }

    async fn logout(&self) -> Result<(), ImapError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ImapError> {
        Ok(())
    }
}

enum ConnectBehavior {
    Succeed(Arc<FakeSession>),
    Fail(ImapError),
}

struct FakeConnector(ConnectBehavior);

#[async_trait]
impl SessionConnector for FakeConnector {
    type Session = FakeSession;

    async fn connect(
        &self,
        _provider: &ProviderConfig,
        _timeout: Duration,
    ) -> Result<ImapClient<FakeSession>, ImapError> {
        match &self.0 {
            ConnectBehavior::Succeed(session) => Ok(ImapClient::from_arc(session.clone())),
            ConnectBehavior::Fail(e) => Err(e.clone()),
        }
    }
}

#[derive(Default)]
struct FakeUserStore {
    users: Mutex<HashMap<UserId, User>>,
}

impl FakeUserStore {
    fn seeded(user: User) -> Self {
        let mut users = HashMap::new();
        users.insert(user.id.clone(), user);
        Self { users: Mutex::new(users) }
    }

    fn snapshot(&self, id: &UserId) -> User {
        self.users.lock().unwrap().get(id).cloned().unwrap()
    }
}

#[async_trait]
impl UserStore for FakeUserStore {
    async fn reload(&self, id: &UserId) -> Result<User, UserStoreError> {
        self.users.lock().unwrap().get(id).cloned().ok_or_else(|| UserStoreError::NotFound(id.clone()))
    }

    async fn update(&self, id: &UserId, patch: UserPatch) -> Result<(), UserStoreError> {
        let mut guard = self.users.lock().unwrap();
        let user = guard.get_mut(id).ok_or_else(|| UserStoreError::NotFound(id.clone()))?;
        if let Some(v) = patch.last_uid {
            user.last_uid = Some(v);
        }
        if let Some(v) = patch.last_uid_validity {
            user.last_uid_validity = Some(v);
        }
        if let Some(v) = patch.last_email_at {
            user.last_email_at = Some(v);
        }
        if let Some(v) = patch.last_login_at {
            user.last_login_at = v;
        }
        Ok(())
    }

    async fn list_active_users(&self) -> Result<Vec<UserId>, UserStoreError> {
        Ok(self.users.lock().unwrap().keys().cloned().collect())
    }
}

#[derive(Default)]
struct RecordingProcessUid {
    seen: Mutex<Vec<(UserId, String, u32)>>,
}

impl RecordingProcessUid {
    fn snapshot(&self) -> Vec<(UserId, String, u32)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessUid for RecordingProcessUid {
    async fn process_uid(&self, user_id: &UserId, folder: &str, uid: u32) {
        self.seen.lock().unwrap().push((user_id.clone(), folder.to_string(), uid));
    }
}

#[derive(Default)]
struct FakeNotifier;

impl DispatchNotifier for FakeNotifier {
    fn notify_connect(&self, _user_id: &UserId) {}
    fn notify_disconnect(&self, _user_id: &UserId) {}
}

fn base_user(id: UserId) -> User {
    User {
        email: format!("{}@example.com", id),
        id,
        provider: ProviderConfig {
            host: "imap.example.com".to_string(),
            port: 993,
            use_tls: true,
            auth: AuthMethod::Password { username: "me".into(), password: "hunter2".into() },
        },
        last_uid: None,
        last_uid_validity: None,
        last_email_at: None,
        last_login_at: Utc::now(),
    }
}

fn worker_config() -> WorkerConfig {
    WorkerConfig { connect_timeout_secs: 1, idle_timeout_secs: 1 }
}

#[tokio::test]
async fn new_user_with_no_cursor_resyncs_by_date() {
    let user_id = UserId("1".to_string());
    let mut user = base_user(user_id.clone());
    user.last_uid = None;
    user.last_uid_validity = None;

    let session = Arc::new(FakeSession {
        folders: vec!["INBOX"],
        uid_validity: "1000".to_string(),
        date_uids: Mutex::new(vec![5001, 5002]),
        ..Default::default()
    });

    let store = Arc::new(FakeUserStore::seeded(user));
    let process_uid = Arc::new(RecordingProcessUid::default());
    let connector = FakeConnector(ConnectBehavior::Succeed(session));

    let worker = UserWorker::new(
        user_id.clone(),
        connector,
        store.clone(),
        process_uid.clone(),
        worker_config(),
        Arc::new(FakeNotifier::default()),
    );
    let stop = Arc::new(Notify::new());

    let stop_clone = stop.clone();
    let handle = tokio::spawn(async move { worker.run(stop_clone, 0).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    stop.notify_one();
    let result = handle.await.unwrap();

    assert!(result.is_ok());
    let seen = process_uid.snapshot();
    assert!(seen.contains(&(user_id.clone(), "INBOX".to_string(), 5001)));
    assert!(seen.contains(&(user_id.clone(), "INBOX".to_string(), 5002)));

    let persisted = store.snapshot(&user_id);
    assert_eq!(persisted.last_uid, Some(5002));
    assert_eq!(persisted.last_uid_validity, Some("1000".to_string()));
}

#[tokio::test]
async fn cursor_intact_resyncs_by_uid_range() {
    let user_id = UserId("2".to_string());
    let mut user = base_user(user_id.clone());
    user.last_uid = Some(100);
    user.last_uid_validity = Some("1000".to_string());
    user.last_email_at = Some(Utc::now());

    let mut ranges = HashMap::new();
    ranges.insert("UID 101:200".to_string(), vec![150, 160]);

    let session = Arc::new(FakeSession {
        folders: vec!["INBOX"],
        uid_validity: "1000".to_string(),
        uid_range_responses: Mutex::new(ranges),
        ..Default::default()
    });

    let store = Arc::new(FakeUserStore::seeded(user));
    let process_uid = Arc::new(RecordingProcessUid::default());
    let connector = FakeConnector(ConnectBehavior::Succeed(session));

    let worker = UserWorker::new(
        user_id.clone(),
        connector,
        store.clone(),
        process_uid.clone(),
        worker_config(),
        Arc::new(FakeNotifier::default()),
    );
    let stop = Arc::new(Notify::new());
    let stop_clone = stop.clone();
    let handle = tokio::spawn(async move { worker.run(stop_clone, 0).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    stop.notify_one();
    let result = handle.await.unwrap();

    assert!(result.is_ok());
    let seen = process_uid.snapshot();
    assert!(seen.contains(&(user_id.clone(), "INBOX".to_string(), 150)));
    assert!(seen.contains(&(user_id.clone(), "INBOX".to_string(), 160)));

    let persisted = store.snapshot(&user_id);
    assert_eq!(persisted.last_uid, Some(160));
}

#[tokio::test]
async fn rotated_uid_validity_drops_cursor_and_resyncs_by_date() {
    let user_id = UserId("3".to_string());
    let mut user = base_user(user_id.clone());
    user.last_uid = Some(100);
    user.last_uid_validity = Some("999".to_string());
    user.last_email_at = Some(Utc::now());

    let session = Arc::new(FakeSession {
        folders: vec!["INBOX"],
        uid_validity: "1000".to_string(),
        date_uids: Mutex::new(vec![7001]),
        ..Default::default()
    });

    let store = Arc::new(FakeUserStore::seeded(user));
    let process_uid = Arc::new(RecordingProcessUid::default());
    let connector = FakeConnector(ConnectBehavior::Succeed(session));

    let worker = UserWorker::new(
        user_id.clone(),
        connector,
        store.clone(),
        process_uid.clone(),
        worker_config(),
        Arc::new(FakeNotifier::default()),
    );
    let stop = Arc::new(Notify::new());
    let stop_clone = stop.clone();
    let handle = tokio::spawn(async move { worker.run(stop_clone, 0).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    stop.notify_one();
    let result = handle.await.unwrap();

    assert!(result.is_ok());
    let seen = process_uid.snapshot();
    assert!(seen.contains(&(user_id.clone(), "INBOX".to_string(), 7001)));

    let persisted = store.snapshot(&user_id);
    assert_eq!(persisted.last_uid_validity, Some("1000".to_string()));
}

#[tokio::test]
async fn auth_failure_is_classified_and_never_panics() {
    let user_id = UserId("4".to_string());
    let user = base_user(user_id.clone());

    let store = Arc::new(FakeUserStore::seeded(user));
    let process_uid = Arc::new(RecordingProcessUid::default());
    let connector = FakeConnector(ConnectBehavior::Fail(ImapError::Auth("invalid credentials".into())));

    let worker = UserWorker::new(
        user_id,
        connector,
        store,
        process_uid,
        worker_config(),
        Arc::new(FakeNotifier::default()),
    );
    let stop = Arc::new(Notify::new());

    let result = worker.run(stop, 0).await;

    match result {
        Err(WorkerError::Imap(ImapError::Auth(_))) => {}
        other => panic!("expected an Auth error, got {:?}", other),
    }
}

#[tokio::test]
async fn idle_exists_triggers_a_second_resync() {
    let user_id = UserId("5".to_string());
    let mut user = base_user(user_id.clone());
    user.last_uid = None;
    user.last_uid_validity = None;

    let mut ranges = HashMap::new();
    // first resync (by date) leaves the cursor at 5002; idle fires EXISTS,
    // the follow-up resync searches forward from there.
    ranges.insert("UID 5003:5102".to_string(), vec![9001]);

    let session = Arc::new(FakeSession {
        folders: vec!["INBOX"],
        uid_validity: "1000".to_string(),
        date_uids: Mutex::new(vec![5001, 5002]),
        uid_range_responses: Mutex::new(ranges),
        idle_script: Mutex::new(VecDeque::from(vec![IdleOutcome::NewData(UnsolicitedKind::Exists(1))])),
    });

    let store = Arc::new(FakeUserStore::seeded(user));
    let process_uid = Arc::new(RecordingProcessUid::default());
    let connector = FakeConnector(ConnectBehavior::Succeed(session));

    let worker = UserWorker::new(
        user_id.clone(),
        connector,
        store.clone(),
        process_uid.clone(),
        worker_config(),
        Arc::new(FakeNotifier::default()),
    );
    let stop = Arc::new(Notify::new());
    let stop_clone = stop.clone();
    let handle = tokio::spawn(async move { worker.run(stop_clone, 0).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.notify_one();
    let result = handle.await.unwrap();

    assert!(result.is_ok());
    let seen = process_uid.snapshot();
    assert!(seen.contains(&(user_id.clone(), "INBOX".to_string(), 9001)));

    let persisted = store.snapshot(&user_id);
    assert_eq!(persisted.last_uid, Some(9001));
}
