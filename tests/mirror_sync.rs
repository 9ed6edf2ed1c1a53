use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use quire::{
    application::{
        build::{BuildConfig, BuildService},
        mirror::{
            MirrorError, MirrorService, MirrorSettings, SyncOutcome, VerificationStatus,
            document_for,
        },
        render::Renderer,
        repos::{ContentRepo, MappingRepo, RemoteError, RemoteSession, RemoteStore},
        site::{SiteProfile, SiteService},
    },
    domain::entities::{ContentRecord, RemoteRecord},
    infra::{
        artifacts::FsArtifactWriter,
        content::FsContentRepo,
        http::{HttpState, build_router},
        mapping::TomlMappingStore,
        memory::{InMemoryContentRepo, InMemoryMappings, InMemoryRemote},
        probe::DirectoryProbe,
    },
};
use quire_lexicon::{
    AtUri, DOCUMENT_COLLECTION, DocumentRecord, PUBLICATION_COLLECTION, PublicationRecord,
    RecordRef,
};
use time::macros::datetime;

const DID: &str = "did:plc:owner";
const SITE_URL: &str = "https://blog.example/";

fn record(slug: &str, title: &str) -> ContentRecord {
    ContentRecord {
        slug: slug.to_string(),
        title: title.to_string(),
        description: None,
        body_markdown: format!("Words about {slug}."),
        tags: vec!["Notes".to_string()],
        published_at: datetime!(2024-02-01 12:00 UTC),
        updated_at: None,
    }
}

fn settings() -> MirrorSettings {
    MirrorSettings {
        identifier: "owner.test".to_string(),
        secret: "app-password".to_string(),
        expected_did: Some(DID.to_string()),
        publication_rkey: "self".to_string(),
        site_url: SITE_URL.to_string(),
        site_name: "Quire".to_string(),
        site_description: None,
        pass_deadline: Duration::from_secs(30),
    }
}

fn publication_uri() -> String {
    AtUri::publication(DID, "self").to_string()
}

struct Harness {
    content: Arc<dyn ContentRepo>,
    mappings: Arc<dyn MappingRepo>,
    remote: Arc<InMemoryRemote>,
    mirror: MirrorService,
}

fn harness(content: Arc<dyn ContentRepo>, mappings: Arc<dyn MappingRepo>) -> Harness {
    let remote = Arc::new(InMemoryRemote::new(DID));
    let mirror = MirrorService::new(
        content.clone(),
        mappings.clone(),
        remote.clone(),
        settings(),
    );
    Harness {
        content,
        mappings,
        remote,
        mirror,
    }
}

fn in_memory(records: Vec<ContentRecord>) -> Harness {
    harness(
        Arc::new(InMemoryContentRepo::with_records(records)),
        Arc::new(InMemoryMappings::default()),
    )
}

impl Harness {
    async fn publish(&self) -> quire::application::mirror::SyncReport {
        let records = self.content.list_records().await.expect("records");
        self.mirror.publish(records).await.expect("publish pass")
    }

    async fn pull(&self) -> quire::application::mirror::SyncReport {
        let remote = self.mirror.fetch_remote_documents().await.expect("listing");
        self.mirror.pull(remote).await.expect("pull pass")
    }

    /// Replace a document on the remote as another client would.
    fn edit_remote(&self, record: &ContentRecord) {
        let document = document_for(record, &publication_uri());
        self.remote.put_raw(
            DOCUMENT_COLLECTION,
            &record.slug,
            serde_json::to_value(document).expect("document json"),
        );
    }
}

#[tokio::test]
async fn publishing_twice_creates_once_then_skips() {
    let h = in_memory(vec![record("one", "One"), record("two", "Two")]);

    let first = h.publish().await;
    assert!(first.is_success());
    assert!(matches!(first.outcome_for("one"), Some(SyncOutcome::Created { .. })));
    assert!(matches!(first.outcome_for("two"), Some(SyncOutcome::Created { .. })));
    // Publication record plus two documents.
    assert_eq!(h.remote.writes(), 3);

    let second = h.publish().await;
    assert_eq!(second.counts().skipped, 2);
    assert_eq!(h.remote.writes(), 3);

    let mapping = h.mappings.get("one").await.expect("get").expect("mapped");
    assert_eq!(mapping.remote_uri, format!("at://{DID}/site.standard.document/one"));
    assert_eq!(
        mapping.content_hash,
        record("one", "One").content_hash()
    );
    assert_eq!(
        h.mappings.publication().await.expect("publication").map(|p| p.uri),
        Some(publication_uri())
    );
}

#[tokio::test]
async fn edited_records_are_updated_in_place() {
    let h = in_memory(vec![record("one", "One"), record("two", "Two")]);
    h.publish().await;

    h.content
        .write_record(&record("two", "Two, revised"))
        .await
        .expect("edit");
    let report = h.publish().await;

    assert!(matches!(report.outcome_for("one"), Some(SyncOutcome::Skipped { .. })));
    assert!(matches!(report.outcome_for("two"), Some(SyncOutcome::Updated { .. })));
    assert_eq!(h.remote.document("two").map(|d| d.title), Some("Two, revised".to_string()));
}

#[tokio::test]
async fn existing_publication_record_is_adopted() {
    let h = in_memory(vec![record("one", "One")]);
    let existing = h.remote.put_raw(
        PUBLICATION_COLLECTION,
        "self",
        serde_json::to_value(PublicationRecord::new(SITE_URL, "Quire", None)).expect("json"),
    );

    let report = h.publish().await;
    assert!(report.is_success());
    assert_eq!(
        h.mappings.publication().await.expect("publication").map(|p| p.cid),
        Some(existing.cid)
    );
    // Only the document was written.
    assert_eq!(h.remote.writes(), 1);
}

#[tokio::test]
async fn lost_mapping_table_recovers_from_the_remote() {
    let h = in_memory(vec![record("one", "One"), record("two", "Two")]);
    h.publish().await;
    assert_eq!(h.remote.writes(), 3);

    // A fresh table against the same repository, as after a crash between
    // a remote write and the mapping store.
    let mappings: Arc<dyn MappingRepo> = Arc::new(InMemoryMappings::default());
    h.content
        .write_record(&record("two", "Two, revised"))
        .await
        .expect("edit");
    let mirror = MirrorService::new(
        h.content.clone(),
        mappings.clone(),
        h.remote.clone(),
        settings(),
    );
    let records = h.content.list_records().await.expect("records");
    let report = mirror.publish(records.clone()).await.expect("publish pass");

    assert!(report.is_success(), "{report:?}");
    assert!(matches!(
        report.outcome_for("one"),
        Some(SyncOutcome::Skipped { reason: "adopted" })
    ));
    assert!(matches!(report.outcome_for("two"), Some(SyncOutcome::Updated { .. })));
    assert_eq!(h.remote.writes(), 4);
    assert_eq!(
        mappings.publication().await.expect("publication").map(|p| p.uri),
        Some(publication_uri())
    );
    assert_eq!(
        mappings.get("one").await.expect("get").map(|m| m.content_hash),
        Some(record("one", "One").content_hash())
    );

    let again = mirror.publish(records).await.expect("publish pass");
    assert_eq!(again.counts().skipped, 2);
    assert_eq!(h.remote.writes(), 4);
}

/// Takes `delay` for every document write.
struct SlowDocuments {
    inner: Arc<InMemoryRemote>,
    delay: Duration,
}

#[async_trait]
impl RemoteStore for SlowDocuments {
    async fn authenticate(&self, identifier: &str, secret: &str) -> Result<RemoteSession, RemoteError> {
        self.inner.authenticate(identifier, secret).await
    }

    async fn create_publication(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &PublicationRecord,
    ) -> Result<RecordRef, RemoteError> {
        self.inner.create_publication(session, rkey, record).await
    }

    async fn create_document(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &DocumentRecord,
    ) -> Result<RecordRef, RemoteError> {
        tokio::time::sleep(self.delay).await;
        self.inner.create_document(session, rkey, record).await
    }

    async fn update_document(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &DocumentRecord,
    ) -> Result<RecordRef, RemoteError> {
        tokio::time::sleep(self.delay).await;
        self.inner.update_document(session, rkey, record).await
    }

    async fn get_record(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<RemoteRecord, RemoteError> {
        self.inner.get_record(repo, collection, rkey).await
    }

    async fn list_records(&self, repo: &str, collection: &str) -> Result<Vec<RemoteRecord>, RemoteError> {
        self.inner.list_records(repo, collection).await
    }
}

#[tokio::test]
async fn pass_deadline_defers_the_rest_and_keeps_applied_mappings() {
    let inner = Arc::new(InMemoryRemote::new(DID));
    let records = vec![record("a", "A"), record("b", "B"), record("c", "C"), record("d", "D")];
    let mappings: Arc<dyn MappingRepo> = Arc::new(InMemoryMappings::default());
    let mirror = MirrorService::new(
        Arc::new(InMemoryContentRepo::with_records(records.clone())),
        mappings.clone(),
        Arc::new(SlowDocuments {
            inner: inner.clone(),
            delay: Duration::from_millis(200),
        }),
        MirrorSettings {
            pass_deadline: Duration::from_millis(300),
            ..settings()
        },
    );

    let report = mirror.publish(records).await.expect("publish pass");

    assert!(matches!(report.outcome_for("a"), Some(SyncOutcome::Created { .. })));
    for slug in ["b", "c", "d"] {
        assert!(
            matches!(report.outcome_for(slug), Some(SyncOutcome::Deferred)),
            "{slug}: {:?}",
            report.outcome_for(slug)
        );
        assert!(mappings.get(slug).await.expect("get").is_none());
    }
    assert_eq!(report.counts().deferred, 3);
    assert!(!report.is_success());
    assert!(mappings.get("a").await.expect("get").is_some());
    // The write cut off by the deadline never reached the store.
    assert!(inner.document("b").is_none());
}

#[tokio::test]
async fn refused_credentials_abort_the_pass() {
    let h = in_memory(vec![record("one", "One")]);
    h.remote.refuse_auth(true);

    let records = h.content.list_records().await.expect("records");
    let err = h.mirror.publish(records).await.expect_err("auth refused");
    assert!(matches!(err, MirrorError::Auth(_)));
    assert!(h.mappings.list().await.expect("list").is_empty());
}

#[tokio::test]
async fn session_of_another_repository_is_refused() {
    let content: Arc<dyn ContentRepo> = Arc::new(InMemoryContentRepo::with_records(vec![]));
    let mirror = MirrorService::new(
        content,
        Arc::new(InMemoryMappings::default()),
        Arc::new(InMemoryRemote::new("did:plc:someone-else")),
        settings(),
    );

    let err = mirror.publish(Vec::new()).await.expect_err("wrong repo");
    assert!(matches!(err, MirrorError::IdentityMismatch { .. }));
}

/// Expires every issued session right before the document write number
/// `expire_at`, the way a PDS does when an access token lapses mid-pass.
struct ExpiringRemote {
    inner: Arc<InMemoryRemote>,
    document_writes: AtomicUsize,
    expire_at: usize,
}

impl ExpiringRemote {
    fn tick(&self) {
        if self.document_writes.fetch_add(1, Ordering::SeqCst) == self.expire_at {
            self.inner.expire_sessions();
        }
    }
}

#[async_trait]
impl RemoteStore for ExpiringRemote {
    async fn authenticate(&self, identifier: &str, secret: &str) -> Result<RemoteSession, RemoteError> {
        self.inner.authenticate(identifier, secret).await
    }

    async fn create_publication(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &PublicationRecord,
    ) -> Result<RecordRef, RemoteError> {
        self.inner.create_publication(session, rkey, record).await
    }

    async fn create_document(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &DocumentRecord,
    ) -> Result<RecordRef, RemoteError> {
        self.tick();
        self.inner.create_document(session, rkey, record).await
    }

    async fn update_document(
        &self,
        session: &RemoteSession,
        rkey: &str,
        record: &DocumentRecord,
    ) -> Result<RecordRef, RemoteError> {
        self.tick();
        self.inner.update_document(session, rkey, record).await
    }

    async fn get_record(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<RemoteRecord, RemoteError> {
        self.inner.get_record(repo, collection, rkey).await
    }

    async fn list_records(&self, repo: &str, collection: &str) -> Result<Vec<RemoteRecord>, RemoteError> {
        self.inner.list_records(repo, collection).await
    }
}

#[tokio::test]
async fn expired_session_is_renewed_once_and_the_pass_completes() {
    let inner = Arc::new(InMemoryRemote::new(DID));
    let remote = Arc::new(ExpiringRemote {
        inner: inner.clone(),
        document_writes: AtomicUsize::new(0),
        expire_at: 1,
    });
    let records = vec![record("a", "A"), record("b", "B"), record("c", "C")];
    let mirror = MirrorService::new(
        Arc::new(InMemoryContentRepo::with_records(records.clone())),
        Arc::new(InMemoryMappings::default()),
        remote,
        settings(),
    );

    let report = mirror.publish(records).await.expect("publish pass");

    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.counts().synced, 3);
    assert_eq!(inner.sessions_issued(), 2);
}

#[tokio::test]
async fn failed_reauthentication_marks_the_rest_retryable() {
    struct Lockout(Arc<InMemoryRemote>);

    #[async_trait]
    impl RemoteStore for Lockout {
        async fn authenticate(&self, identifier: &str, secret: &str) -> Result<RemoteSession, RemoteError> {
            self.0.authenticate(identifier, secret).await
        }
        async fn create_publication(
            &self,
            session: &RemoteSession,
            rkey: &str,
            record: &PublicationRecord,
        ) -> Result<RecordRef, RemoteError> {
            self.0.create_publication(session, rkey, record).await
        }
        async fn create_document(
            &self,
            _session: &RemoteSession,
            _rkey: &str,
            _record: &DocumentRecord,
        ) -> Result<RecordRef, RemoteError> {
            self.0.refuse_auth(true);
            Err(RemoteError::SessionExpired)
        }
        async fn update_document(
            &self,
            session: &RemoteSession,
            rkey: &str,
            record: &DocumentRecord,
        ) -> Result<RecordRef, RemoteError> {
            self.0.update_document(session, rkey, record).await
        }
        async fn get_record(
            &self,
            repo: &str,
            collection: &str,
            rkey: &str,
        ) -> Result<RemoteRecord, RemoteError> {
            self.0.get_record(repo, collection, rkey).await
        }
        async fn list_records(&self, repo: &str, collection: &str) -> Result<Vec<RemoteRecord>, RemoteError> {
            self.0.list_records(repo, collection).await
        }
    }

    let records = vec![record("a", "A"), record("b", "B")];
    let mirror = MirrorService::new(
        Arc::new(InMemoryContentRepo::with_records(records.clone())),
        Arc::new(InMemoryMappings::default()),
        Arc::new(Lockout(Arc::new(InMemoryRemote::new(DID)))),
        settings(),
    );

    let report = mirror.publish(records).await.expect("pass completes");
    assert_eq!(report.counts().errored, 2);
    for slug in ["a", "b"] {
        assert!(matches!(
            report.outcome_for(slug),
            Some(SyncOutcome::Errored { retryable: true, .. })
        ));
    }
}

async fn on_disk(dir: &tempfile::TempDir, records: &[ContentRecord]) -> Harness {
    let content = FsContentRepo::new(dir.path().join("posts"));
    for record in records {
        content.write_record(record).await.expect("seed post");
    }
    let mappings = TomlMappingStore::open(dir.path().join("mappings.toml"))
        .await
        .expect("mapping store");
    harness(Arc::new(content), Arc::new(mappings))
}

#[tokio::test]
async fn pull_never_clobbers_divergent_local_edits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = on_disk(&dir, &[record("post", "Original")]).await;
    h.publish().await;

    h.content
        .write_record(&record("post", "Edited locally"))
        .await
        .expect("local edit");
    h.edit_remote(&record("post", "Edited remotely"));
    let file = dir.path().join("posts/post.md");
    let before = std::fs::read(&file).expect("post file");

    let report = h.pull().await;

    let Some(SyncOutcome::Conflicted(conflict)) = report.outcome_for("post") else {
        panic!("expected a conflict, got {:?}", report.outcome_for("post"));
    };
    assert_eq!(conflict.slug, "post");
    assert_eq!(conflict.local_hash, record("post", "Edited locally").content_hash());
    assert_eq!(conflict.remote_hash, record("post", "Edited remotely").content_hash());
    assert_eq!(conflict.mapped_hash, Some(record("post", "Original").content_hash()));
    assert_eq!(std::fs::read(&file).expect("post file"), before);
    assert!(!report.is_success());
}

#[tokio::test]
async fn pull_takes_remote_edits_when_local_is_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = on_disk(&dir, &[record("post", "Original")]).await;
    h.publish().await;

    h.edit_remote(&record("post", "Edited remotely"));
    let report = h.pull().await;
    assert!(matches!(report.outcome_for("post"), Some(SyncOutcome::Pulled { .. })));

    let local = h.content.find_record("post").await.expect("find").expect("present");
    assert_eq!(local.title, "Edited remotely");

    let again = h.pull().await;
    assert!(matches!(again.outcome_for("post"), Some(SyncOutcome::Skipped { .. })));
    // The follow-up publish has nothing left to do.
    assert_eq!(h.publish().await.counts().skipped, 1);
}

#[tokio::test]
async fn pull_keeps_unpublished_local_edits() {
    let h = in_memory(vec![record("post", "Original")]);
    h.publish().await;
    h.content
        .write_record(&record("post", "Draft"))
        .await
        .expect("local edit");

    let report = h.pull().await;
    assert!(matches!(report.outcome_for("post"), Some(SyncOutcome::Skipped { .. })));
    let local = h.content.find_record("post").await.expect("find").expect("present");
    assert_eq!(local.title, "Draft");
}

#[tokio::test]
async fn pull_creates_posts_that_only_exist_remotely_and_ignores_foreign_sites() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = on_disk(&dir, &[]).await;
    h.edit_remote(&record("from-elsewhere", "Written on another client"));

    let mut foreign = document_for(&record("stranger", "Other blog"), "");
    foreign.site = AtUri::publication(DID, "other").to_string();
    h.remote.put_raw(
        DOCUMENT_COLLECTION,
        "stranger",
        serde_json::to_value(foreign).expect("json"),
    );

    let report = h.pull().await;
    assert!(matches!(
        report.outcome_for("from-elsewhere"),
        Some(SyncOutcome::Pulled { .. })
    ));
    assert!(report.outcome_for("stranger").is_none());
    assert!(dir.path().join("posts/from-elsewhere.md").exists());
    assert!(!dir.path().join("posts/stranger.md").exists());
}

#[tokio::test]
async fn mapping_table_survives_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let h = on_disk(&dir, &[record("one", "One"), record("two", "Two")]).await;
        h.publish().await;
    }

    let h = on_disk(&dir, &[]).await;
    let listed = h.mappings.list().await.expect("list");
    let slugs: Vec<&str> = listed.iter().map(|m| m.slug.as_str()).collect();
    assert_eq!(slugs, vec!["one", "two"]);
}

#[tokio::test]
async fn forget_waits_for_the_remote_deletion() {
    let h = in_memory(vec![record("one", "One")]);
    h.publish().await;

    let err = h.mirror.forget("one").await.expect_err("still on the remote");
    assert!(matches!(err, MirrorError::StillPresent { .. }));
    assert!(h.mappings.get("one").await.expect("get").is_some());

    assert!(h.remote.delete(DOCUMENT_COLLECTION, "one"));
    let forgotten = h.mirror.forget("one").await.expect("forgotten");
    assert_eq!(forgotten.slug, "one");
    assert!(h.mappings.get("one").await.expect("get").is_none());

    let err = h.mirror.forget("one").await.expect_err("already gone");
    assert!(matches!(err, MirrorError::NotMapped(_)));
}

#[tokio::test]
async fn built_site_verifies_against_published_records() {
    let out = tempfile::tempdir().expect("tempdir");
    let records = vec![record("one", "One"), record("two", "Two")];
    let h = in_memory(records.clone());
    h.publish().await;

    let profile = SiteProfile::new("Quire", "", SITE_URL)
        .expect("profile")
        .with_identity(DID, "self");
    let site = SiteService::new(h.content.clone(), profile);
    let router = build_router(HttpState {
        site: Arc::new(site),
        static_dir: None,
    });
    let build = BuildService::new(
        h.content.clone(),
        Renderer::new(router),
        Arc::new(FsArtifactWriter::new(out.path())),
    );
    let built = build
        .build(&BuildConfig {
            base_url: SITE_URL.to_string(),
            concurrency: NonZeroUsize::new(2).expect("non-zero"),
            route_timeout: Duration::from_secs(10),
            strict: false,
            static_dir: None,
            publication_descriptor: true,
        })
        .await
        .expect("build");
    assert!(built.is_success());

    let probe = DirectoryProbe::new(out.path());
    let slugs = vec!["one".to_string(), "two".to_string(), "missing".to_string()];
    let report = h.mirror.verify(&probe, &slugs).await.expect("verify");

    assert_eq!(report.publication.as_ref().map(|uri| uri.to_string()), Some(publication_uri()));
    assert_eq!(report.items[0].status, VerificationStatus::Verified);
    assert_eq!(report.items[1].status, VerificationStatus::Verified);
    // The descriptor alone still vouches for the publication.
    assert_eq!(report.items[2].status, VerificationStatus::Warning);
    assert_eq!(report.status(), VerificationStatus::Warning);
}
