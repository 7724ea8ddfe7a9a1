//! Retrieval session orchestrator
//!
//! Drives one file-range retrieval through the phases
//! `idle → planning → opening_session_tx → fetching → confirming_session_tx
//! → submitting_proof_request → done | error`.
//!
//! ## Fast path
//!
//! One bulk range fetch through the gateway. If the gateway reports that it
//! has no local copy of the data, the client opens a download session with a
//! single signature and streams blob-sized chunks instead. Any other error is
//! fatal.
//!
//! ## Metered path
//!
//! 1. Plan every chunk (provider + MDU/blob coordinates)
//! 2. Group chunks per provider into one blob window each
//! 3. Ask the ledger for the session ids it will assign
//! 4. Open all sessions in one transaction
//! 5. Fetch every chunk, presenting its session id
//! 6. Confirm all sessions in one transaction
//! 7. Ask the gateway to submit each provider's proof
//! 8. Reassemble by chunk index

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use nil_chain::{ChainError, IntentSigner, Ledger, RetrievalRequestIntent, SessionRequest};
use nil_core::{
    group_by_provider, hash_retrieval_session_id, parse_account_address, parse_hex_bytes, plan_chunks,
    session_id_hex, BackendKind, ChunkPlanRequest, FileRangeChunk, PlannedChunk, RetrievalConfig, RoutePreference,
    SessionId, SessionIdFields, TransportOp,
};

use crate::cache::ByteCache;
use crate::directory::ProviderDirectory;
use crate::error::{Result, RetrievalError};
use crate::gateway::{
    is_auth_required, DownloadSession, FetchedRange, FileLocator, NilHttpClient, NilfsFileEntry, RangeAuth,
    RetrievalPlan, SignedRangeRequest,
};
use crate::metrics;
use crate::progress::{FetchPhase, FetchProgress, ProgressReporter, ReceiptStatus};
use crate::transport::{
    execute_with_fallback, unix_ms, DecisionTrace, RouterError, RouterOptions, TransportCandidate, TransportOutcome,
};

/// Gateway errors that mean "no local copy here", the only fast-path fallback triggers
pub const FAST_PATH_FALLBACK_PHRASES: [&str; 2] = ["slab not found on disk", "file not found in deal"];

/// Prompt published before each signature request
pub const SIGN_PROMPT: &str = "Sign the request to authorize retrieval";

/// A byte range of one file in one deal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub manifest_root: String,
    pub deal_id: u64,
    pub owner: String,
    pub file_path: String,
    pub range_start: u64,
    /// `None` reads to EOF
    pub range_len: Option<u64>,
    pub metered: bool,
    /// Overrides the configured preference
    pub preference: Option<RoutePreference>,
}

impl FetchRequest {
    pub fn new(
        manifest_root: impl Into<String>,
        deal_id: u64,
        owner: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            manifest_root: manifest_root.into(),
            deal_id,
            owner: owner.into(),
            file_path: file_path.into(),
            range_start: 0,
            range_len: None,
            metered: false,
            preference: None,
        }
    }

    pub fn with_range(mut self, range_start: u64, range_len: u64) -> Self {
        self.range_start = range_start;
        self.range_len = Some(range_len);
        self
    }

    pub fn metered(mut self) -> Self {
        self.metered = true;
        self
    }

    pub fn with_preference(mut self, preference: RoutePreference) -> Self {
        self.preference = Some(preference);
        self
    }

    fn locator(&self) -> FileLocator {
        FileLocator {
            manifest_root: self.manifest_root.clone(),
            deal_id: self.deal_id,
            owner: self.owner.clone(),
            file_path: self.file_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Cache,
    Fast,
    DownloadSession,
    Metered,
}

impl FetchMode {
    fn metric_label(&self) -> &'static str {
        match self {
            FetchMode::Cache => metrics::MODE_CACHE,
            FetchMode::Fast | FetchMode::DownloadSession => metrics::MODE_FAST,
            FetchMode::Metered => metrics::MODE_METERED,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub bytes: Vec<u8>,
    pub mode: FetchMode,
    /// Providers that served bytes, in first-use order
    pub providers: Vec<String>,
    /// 0x-hex ids of the sessions opened (metered only)
    pub session_ids: Vec<String>,
    /// Every routed operation, in execution order
    pub traces: Vec<DecisionTrace>,
}

/// Traces collected during one retrieval
#[derive(Default)]
struct Run {
    traces: Vec<DecisionTrace>,
}

impl Run {
    fn record<T>(
        &mut self,
        result: std::result::Result<TransportOutcome<T>, RouterError>,
    ) -> std::result::Result<T, RouterError> {
        match result {
            Ok(outcome) => {
                self.traces.push(outcome.trace);
                Ok(outcome.data)
            }
            Err(err) => {
                self.traces.push(err.trace().clone());
                Err(err)
            }
        }
    }
}

struct Fetched {
    bytes: Vec<u8>,
    mode: FetchMode,
    providers: Vec<String>,
    session_ids: Vec<String>,
}

/// Orchestrates retrievals against the gateway, providers, ledger and signer
pub struct RetrievalSession<L, S> {
    config: RetrievalConfig,
    http: NilHttpClient,
    directory: Option<ProviderDirectory>,
    ledger: L,
    signer: S,
    cache: Option<Arc<dyn ByteCache>>,
    progress: ProgressReporter,
    nonce: AtomicU64,
}

impl<L: Ledger, S: IntentSigner> RetrievalSession<L, S> {
    /// Fails when the config's blob geometry or retry budget is unusable
    pub fn new(config: RetrievalConfig, ledger: L, signer: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            http: NilHttpClient::default(),
            directory: None,
            ledger,
            signer,
            cache: None,
            progress: ProgressReporter::new(),
            nonce: AtomicU64::new(unix_ms()),
        })
    }

    pub fn with_http(mut self, http: NilHttpClient) -> Self {
        self.http = http;
        self
    }

    /// Enable direct-SP and overlay candidates resolved from the LCD
    pub fn with_directory(mut self, directory: ProviderDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ByteCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> FetchProgress {
        self.progress.snapshot()
    }

    /// List the files of a deal through the router
    pub async fn list_files(&self, manifest_root: &str, deal_id: u64, owner: &str) -> Result<Vec<NilfsFileEntry>> {
        let mut run = Run::default();
        self.route_list_files(&mut run, manifest_root, deal_id, owner, self.config.preference)
            .await
            .map_err(Into::into)
    }

    /// Retrieve a file range
    ///
    /// Takes `&mut self` so one orchestrator runs one retrieval at a time,
    /// which also keeps signature requests strictly sequential.
    pub async fn fetch_file(&mut self, req: &FetchRequest) -> Result<FetchOutcome> {
        let started = Instant::now();
        self.progress.reset();

        let mut run = Run::default();
        let result = self.run_fetch(&mut run, req).await;

        match result {
            Ok(fetched) => {
                self.progress.phase(FetchPhase::Done);
                metrics::record_retrieval(
                    fetched.mode.metric_label(),
                    metrics::OUTCOME_OK,
                    fetched.bytes.len() as u64,
                    started.elapsed(),
                );
                info!(
                    deal_id = req.deal_id,
                    file_path = %req.file_path,
                    mode = ?fetched.mode,
                    bytes = fetched.bytes.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Retrieval complete"
                );
                Ok(FetchOutcome {
                    bytes: fetched.bytes,
                    mode: fetched.mode,
                    providers: fetched.providers,
                    session_ids: fetched.session_ids,
                    traces: run.traces,
                })
            }
            Err(err) => {
                self.progress.fail(err.to_string());
                let mode = if req.metered { metrics::MODE_METERED } else { metrics::MODE_FAST };
                metrics::record_retrieval(mode, metrics::OUTCOME_ERROR, 0, started.elapsed());
                warn!(deal_id = req.deal_id, file_path = %req.file_path, error = %err, "Retrieval failed");
                Err(err)
            }
        }
    }

    async fn run_fetch(&self, run: &mut Run, req: &FetchRequest) -> Result<Fetched> {
        let preference = req.preference.unwrap_or(self.config.preference);
        let file = req.locator();

        if !req.metered {
            if let Some(bytes) = self.cached_range(req) {
                debug!(deal_id = req.deal_id, file_path = %req.file_path, "Served from local cache");
                let len = bytes.len() as u64;
                self.progress.update(|p| {
                    p.bytes_total = len;
                    p.bytes_fetched = len;
                });
                return Ok(Fetched {
                    bytes,
                    mode: FetchMode::Cache,
                    providers: Vec::new(),
                    session_ids: Vec::new(),
                });
            }
        }

        if req.metered {
            self.progress.update(|p| p.receipt_status = ReceiptStatus::Pending);
        }
        self.progress.phase(FetchPhase::Planning);

        let entry = self.resolve_file(run, req, preference).await?;
        let chunks = plan_chunks(&ChunkPlanRequest {
            file_start_offset: entry.start_offset,
            file_size: entry.size_bytes,
            range_start: req.range_start,
            range_len: req.range_len.unwrap_or(u64::MAX),
            mdu_size: self.config.mdu_size,
            blob_size: self.config.blob_size,
        })?;
        let total: u64 = chunks.iter().map(|c| c.range_len).sum();
        debug!(chunks = chunks.len(), bytes = total, "Planned range");

        self.progress.update(|p| {
            p.chunk_count = chunks.len() as u64;
            p.bytes_total = total;
        });

        let fetched = if req.metered {
            self.fetch_metered(run, &file, &chunks, preference).await?
        } else {
            self.fetch_fast(run, &file, &chunks, total, preference).await?
        };

        if let Some(cache) = &self.cache {
            if req.range_start == 0 && total == entry.size_bytes {
                cache.put(req.deal_id, &req.file_path, fetched.bytes.clone());
            }
        }

        Ok(fetched)
    }

    /// Cached bytes clamped to the cached file's end; no network I/O
    fn cached_range(&self, req: &FetchRequest) -> Option<Vec<u8>> {
        self.cache.as_ref()?.get_range(
            req.deal_id,
            &req.file_path,
            req.range_start,
            req.range_len.unwrap_or(u64::MAX),
        )
    }

    async fn resolve_file(
        &self,
        run: &mut Run,
        req: &FetchRequest,
        preference: RoutePreference,
    ) -> Result<NilfsFileEntry> {
        let files = self
            .route_list_files(run, &req.manifest_root, req.deal_id, &req.owner, preference)
            .await?;
        files
            .into_iter()
            .find(|f| f.path == req.file_path)
            .ok_or_else(|| RetrievalError::FileNotFound {
                deal_id: req.deal_id,
                file_path: req.file_path.clone(),
            })
    }

    async fn fetch_fast(
        &self,
        run: &mut Run,
        file: &FileLocator,
        chunks: &[FileRangeChunk],
        total: u64,
        preference: RoutePreference,
    ) -> Result<Fetched> {
        self.progress.phase(FetchPhase::Fetching);

        let whole = FileRangeChunk {
            range_start: chunks.first().map(|c| c.range_start).unwrap_or_default(),
            range_len: total,
        };
        let bulk = self.control_targets();

        match self
            .route_fetch(run, &bulk, file, &whole, &RangeAuth::default(), None, preference)
            .await
        {
            Ok(fetched) => {
                check_len(0, whole.range_len, &fetched)?;
                self.progress.update(|p| {
                    p.chunks_fetched = p.chunk_count;
                    p.bytes_fetched = total;
                });
                return Ok(Fetched {
                    bytes: fetched.bytes,
                    mode: FetchMode::Fast,
                    providers: vec![fetched.provider],
                    session_ids: Vec::new(),
                });
            }
            Err(err) if is_missing_local_copy(&err) => {
                info!(error = %err, "Gateway has no local copy, opening a download session");
            }
            Err(err) => return Err(err.into()),
        }

        let signed = self.sign_range(file, whole.range_start, whole.range_len).await?;
        let session = self.route_open_session(run, file, &signed, preference).await?;
        info!(provider = %session.provider, "Download session opened");

        let targets = self.targets(Some(&session.provider)).await;
        let auth = RangeAuth {
            download_session: Some(session.download_session.clone()),
            ..RangeAuth::default()
        };

        let mut bytes = Vec::with_capacity(total as usize);
        for (index, chunk) in chunks.iter().enumerate() {
            let fetched = self
                .route_fetch(run, &targets, file, chunk, &auth, Some(&session.provider), preference)
                .await?;
            check_len(index, chunk.range_len, &fetched)?;
            bytes.extend_from_slice(&fetched.bytes);
            self.progress.chunk_done(chunk.range_len);
        }

        Ok(Fetched {
            bytes,
            mode: FetchMode::DownloadSession,
            providers: vec![session.provider],
            session_ids: Vec::new(),
        })
    }

    async fn fetch_metered(
        &self,
        run: &mut Run,
        file: &FileLocator,
        chunks: &[FileRangeChunk],
        preference: RoutePreference,
    ) -> Result<Fetched> {
        let blobs_per_mdu = self.config.blobs_per_mdu();

        let mut planned = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let plan = self.route_plan(run, file, chunk, preference).await?;
            planned.push(PlannedChunk {
                index,
                chunk: *chunk,
                provider: plan.provider,
                start_mdu_index: plan.start_mdu_index,
                start_blob_index: plan.start_blob_index,
                blob_count: plan.blob_count,
            });
        }
        let groups = group_by_provider(&planned, blobs_per_mdu);
        info!(chunks = planned.len(), providers = groups.len(), "Planned provider sessions");

        let manifest_root = parse_hex_bytes::<48>("manifest_root", &file.manifest_root)?;
        let expires_at = match self.config.session_expiry_blocks {
            0 => 0,
            blocks => self.ledger.block_number().await? + blocks,
        };
        let requests: Vec<SessionRequest> = groups
            .iter()
            .map(|group| SessionRequest {
                deal_id: file.deal_id,
                provider: group.provider.clone(),
                manifest_root: manifest_root.to_vec(),
                start_mdu_index: group.start_mdu_index(blobs_per_mdu),
                start_blob_index: group.start_blob_index(blobs_per_mdu),
                blob_count: group.blob_count(),
                nonce: self.next_nonce(),
                expires_at,
            })
            .collect();

        let computed = self.ledger.compute_session_ids(&requests).await?;
        let sender = self.ledger.sender();
        let session_ids = verify_computed_sessions(sender.as_deref(), &manifest_root, &requests, &computed)?;

        self.progress.phase(FetchPhase::OpeningSessionTx);
        self.progress.update(|p| p.receipts_total = groups.len() as u64);
        let opened = self.ledger.open_sessions(&requests).await?;
        info!(tx = %opened.tx_hash, sessions = requests.len(), "Retrieval sessions opened");

        self.progress.phase(FetchPhase::Fetching);
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; chunks.len()];
        for (group, session_id) in groups.iter().zip(&session_ids) {
            let targets = self.targets(Some(&group.provider)).await;
            let session_hex = session_id_hex(session_id);
            for planned in &group.chunks {
                let bytes = self
                    .fetch_session_chunk(run, &targets, file, planned, &session_hex, preference)
                    .await?;
                slots[planned.index] = Some(bytes);
            }
        }

        self.progress.phase(FetchPhase::ConfirmingSessionTx);
        let confirmed = self.ledger.confirm_sessions(&session_ids).await?;
        info!(tx = %confirmed.tx_hash, sessions = session_ids.len(), "Retrieval sessions confirmed");

        self.progress.phase(FetchPhase::SubmittingProofRequest);
        for (group, session_id) in groups.iter().zip(&session_ids) {
            let session_hex = session_id_hex(session_id);
            self.route_session_proof(run, &session_hex)
                .await
                .map_err(|e| RetrievalError::ReceiptFailed {
                    provider: group.provider.clone(),
                    reason: e.to_string(),
                })?;
            self.progress.update(|p| p.receipts_submitted += 1);
            debug!(provider = %group.provider, session = %session_hex, "Proof request submitted");
        }
        self.progress.update(|p| p.receipt_status = ReceiptStatus::Submitted);

        let bytes = reassemble(slots)?;
        Ok(Fetched {
            bytes,
            mode: FetchMode::Metered,
            providers: groups.iter().map(|g| g.provider.clone()).collect(),
            session_ids: session_ids.iter().map(session_id_hex).collect(),
        })
    }

    async fn fetch_session_chunk(
        &self,
        run: &mut Run,
        targets: &[(BackendKind, String)],
        file: &FileLocator,
        planned: &PlannedChunk,
        session_hex: &str,
        preference: RoutePreference,
    ) -> Result<Vec<u8>> {
        let chunk = &planned.chunk;
        let expected = Some(planned.provider.as_str());
        let auth = RangeAuth {
            session_id: Some(session_hex.to_string()),
            ..RangeAuth::default()
        };

        let first = self.route_fetch(run, targets, file, chunk, &auth, expected, preference).await;
        let fetched = match first {
            Ok(fetched) => fetched,
            Err(err) if needs_signature(&err) => {
                info!(provider = %planned.provider, chunk = planned.index, "Provider requires a signed request");
                let signed = self.sign_range(file, chunk.range_start, chunk.range_len).await?;
                let auth = RangeAuth {
                    signed: Some(signed),
                    ..auth
                };
                self.route_fetch(run, targets, file, chunk, &auth, expected, preference)
                    .await?
            }
            Err(err) => return Err(err.into()),
        };

        check_len(planned.index, chunk.range_len, &fetched)?;
        self.progress.chunk_done(chunk.range_len);
        Ok(fetched.bytes)
    }

    async fn sign_range(&self, file: &FileLocator, range_start: u64, range_len: u64) -> Result<SignedRangeRequest> {
        self.progress.message(SIGN_PROMPT);

        let nonce = self.next_nonce();
        let expires_at = unix_ms() / 1000 + self.config.signed_request_ttl_secs;
        let intent = RetrievalRequestIntent {
            deal_id: file.deal_id,
            file_path: file.file_path.clone(),
            range_start,
            range_len,
            nonce,
            expires_at,
        };
        info!(
            signer = %self.signer.address(),
            deal_id = file.deal_id,
            range_start,
            range_len,
            "Requesting retrieval signature"
        );
        let signature = self.signer.sign_retrieval_request(&intent).await?;
        self.progress.update(|p| p.message = None);

        Ok(SignedRangeRequest {
            signature,
            nonce,
            expires_at,
            range_start,
            range_len,
        })
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn router_options(&self, op: TransportOp, preference: RoutePreference) -> RouterOptions {
        let timeout = match op {
            TransportOp::Fetch | TransportOp::Slab | TransportOp::Upload => self.config.fetch_timeout(),
            TransportOp::OpenSession | TransportOp::SessionProof => self.config.session_timeout(),
            TransportOp::ListFiles | TransportOp::Plan | TransportOp::ManifestInfo | TransportOp::MduKzg => {
                self.config.control_timeout()
            }
        };
        RouterOptions::new(preference)
            .with_timeout(timeout)
            .with_max_attempts_per_backend(self.config.max_attempts_per_backend)
    }

    /// Gateway, then the configured direct-SP base when it is a different host
    fn control_targets(&self) -> Vec<(BackendKind, String)> {
        let mut targets = vec![(BackendKind::Gateway, self.config.gateway_base.clone())];
        if let Some(base) = &self.config.direct_sp_base {
            if *base != self.config.gateway_base {
                targets.push((BackendKind::DirectSp, base.clone()));
            }
        }
        targets
    }

    /// Gateway first, then whatever the directory knows about `provider`
    async fn targets(&self, provider: Option<&str>) -> Vec<(BackendKind, String)> {
        let mut targets = vec![(BackendKind::Gateway, self.config.gateway_base.clone())];

        if let (Some(directory), Some(provider)) = (&self.directory, provider) {
            match directory.lookup(provider).await {
                Ok(Some(endpoints)) => {
                    if let Some(base) = endpoints.direct_sp_base() {
                        targets.push((BackendKind::DirectSp, base.to_string()));
                    }
                    if let Some(bridge) = endpoints.overlay_bridge() {
                        targets.push((BackendKind::PeerOverlay, bridge));
                    }
                }
                Ok(None) => debug!(provider, "Provider not in directory"),
                Err(err) => warn!(provider, error = %err, "Provider directory lookup failed"),
            }
        }

        targets
    }

    async fn route_list_files(
        &self,
        run: &mut Run,
        manifest_root: &str,
        deal_id: u64,
        owner: &str,
        preference: RoutePreference,
    ) -> std::result::Result<Vec<NilfsFileEntry>, RouterError> {
        let http = &self.http;
        let targets = self.control_targets();
        let candidates = targets
            .iter()
            .map(|(backend, base)| {
                let base = base.as_str();
                TransportCandidate::new(*backend, base, move || http.list_files(base, manifest_root, deal_id, owner))
            })
            .collect();
        let opts = self.router_options(TransportOp::ListFiles, preference);
        run.record(execute_with_fallback(TransportOp::ListFiles, candidates, &opts).await)
    }

    async fn route_plan(
        &self,
        run: &mut Run,
        file: &FileLocator,
        chunk: &FileRangeChunk,
        preference: RoutePreference,
    ) -> std::result::Result<RetrievalPlan, RouterError> {
        let http = &self.http;
        let (start, len) = (chunk.range_start, chunk.range_len);
        let targets = self.control_targets();
        let candidates = targets
            .iter()
            .map(|(backend, base)| {
                let base = base.as_str();
                TransportCandidate::new(*backend, base, move || {
                    http.plan_retrieval_session(base, file, start, len)
                })
            })
            .collect();
        let opts = self.router_options(TransportOp::Plan, preference);
        run.record(execute_with_fallback(TransportOp::Plan, candidates, &opts).await)
    }

    #[allow(clippy::too_many_arguments)]
    async fn route_fetch(
        &self,
        run: &mut Run,
        targets: &[(BackendKind, String)],
        file: &FileLocator,
        chunk: &FileRangeChunk,
        auth: &RangeAuth,
        expected_provider: Option<&str>,
        preference: RoutePreference,
    ) -> std::result::Result<FetchedRange, RouterError> {
        let http = &self.http;
        let (start, len) = (chunk.range_start, chunk.range_len);
        let candidates = targets
            .iter()
            .map(|(backend, base)| {
                let base = base.as_str();
                TransportCandidate::new(*backend, base, move || {
                    http.fetch_range(base, file, start, len, auth, expected_provider)
                })
            })
            .collect();
        let opts = self.router_options(TransportOp::Fetch, preference);
        run.record(execute_with_fallback(TransportOp::Fetch, candidates, &opts).await)
    }

    async fn route_open_session(
        &self,
        run: &mut Run,
        file: &FileLocator,
        signed: &SignedRangeRequest,
        preference: RoutePreference,
    ) -> std::result::Result<DownloadSession, RouterError> {
        let http = &self.http;
        let base = self.config.gateway_base.as_str();
        let candidates = vec![TransportCandidate::new(BackendKind::Gateway, base, move || {
            http.open_download_session(base, file, signed)
        })];
        let opts = self.router_options(TransportOp::OpenSession, preference);
        run.record(execute_with_fallback(TransportOp::OpenSession, candidates, &opts).await)
    }

    /// Gateway only: the proof request needs gateway-held authorization
    async fn route_session_proof(&self, run: &mut Run, session_hex: &str) -> std::result::Result<(), RouterError> {
        let http = &self.http;
        let base = self.config.gateway_base.as_str();
        let candidates = vec![TransportCandidate::new(BackendKind::Gateway, base, move || {
            http.submit_session_proof(base, session_hex)
        })];
        let opts = self.router_options(TransportOp::SessionProof, RoutePreference::PreferGateway);
        run.record(execute_with_fallback(TransportOp::SessionProof, candidates, &opts).await)
    }
}

/// The gateway answered, but has no local copy of the slab or file
pub fn is_missing_local_copy(err: &RouterError) -> bool {
    !err.is_terminal()
        && err
            .last_error()
            .is_some_and(|e| FAST_PATH_FALLBACK_PHRASES.iter().any(|phrase| e.message.contains(phrase)))
}

/// Some backend refused the read until it is signed
pub fn needs_signature(err: &RouterError) -> bool {
    !err.is_terminal()
        && err
            .trace()
            .attempts
            .iter()
            .any(|a| a.error_message.as_deref().is_some_and(is_auth_required))
}

/// Check ledger-computed ids line up with the provider groups
///
/// The ledger hashes ids with the calling account as owner. When that
/// account is known, every id is also recomputed locally; providers are
/// accepted as bech32 or 0x-hex addresses.
pub fn verify_computed_sessions(
    caller: Option<&str>,
    manifest_root: &[u8; 48],
    requests: &[SessionRequest],
    computed: &[nil_chain::ComputedSession],
) -> Result<Vec<SessionId>> {
    if computed.len() != requests.len() {
        return Err(ChainError::SessionCountMismatch {
            expected: requests.len(),
            actual: computed.len(),
        }
        .into());
    }

    let owner = caller.map(|c| parse_account_address("caller", c)).transpose()?;
    let mut ids = Vec::with_capacity(computed.len());

    for (index, (req, session)) in requests.iter().zip(computed).enumerate() {
        if session.provider != req.provider {
            return Err(RetrievalError::SessionProviderMismatch {
                index,
                expected: req.provider.clone(),
                actual: session.provider.clone(),
            });
        }

        if let Some(owner) = owner {
            let provider = parse_account_address("provider", &req.provider)?;
            let local = hash_retrieval_session_id(&SessionIdFields {
                owner,
                deal_id: req.deal_id,
                provider,
                manifest_root: *manifest_root,
                start_mdu_index: req.start_mdu_index,
                start_blob_index: req.start_blob_index,
                blob_count: req.blob_count,
                nonce: req.nonce,
                expires_at: req.expires_at,
            });
            if local != session.session_id {
                return Err(RetrievalError::SessionIdMismatch {
                    provider: req.provider.clone(),
                });
            }
        }

        ids.push(session.session_id);
    }

    Ok(ids)
}

/// Concatenate chunk bytes in chunk-index order
pub fn reassemble(slots: Vec<Option<Vec<u8>>>) -> Result<Vec<u8>> {
    let total = slots.len();
    let missing: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_none())
        .map(|(i, _)| i)
        .collect();
    if !missing.is_empty() {
        return Err(RetrievalError::IncompleteDownload { missing, total });
    }
    Ok(slots.into_iter().flatten().flatten().collect())
}

fn check_len(index: usize, expected: u64, fetched: &FetchedRange) -> Result<()> {
    let actual = fetched.bytes.len() as u64;
    if actual != expected {
        return Err(RetrievalError::ShortRead { index, expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ErrorClass, TransportError};
    use nil_chain::ComputedSession;

    fn request(provider: &str) -> SessionRequest {
        SessionRequest {
            deal_id: 1,
            provider: provider.to_string(),
            manifest_root: vec![0x55; 48],
            start_mdu_index: 0,
            start_blob_index: 0,
            blob_count: 1,
            nonce: 9,
            expires_at: 0,
        }
    }

    async fn failing_with(err: TransportError) -> RouterError {
        let candidates = vec![TransportCandidate::new(BackendKind::Gateway, "gw", move || {
            let err = err.clone();
            async move { Err::<(), _>(err) }
        })];
        execute_with_fallback(TransportOp::Fetch, candidates, &RouterOptions::default())
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_fast_path_fallback_matches_exact_phrases() {
        let slab = failing_with(TransportError::http(404, "slab not found on disk")).await;
        assert!(is_missing_local_copy(&slab));

        let file = failing_with(TransportError::http(404, "file not found in deal (check path)")).await;
        assert!(is_missing_local_copy(&file));

        let other = failing_with(TransportError::http(404, "deal not found")).await;
        assert!(!is_missing_local_copy(&other));

        let server = failing_with(TransportError::http(500, "internal error")).await;
        assert!(!is_missing_local_copy(&server));
    }

    #[tokio::test]
    async fn test_needs_signature() {
        let auth = failing_with(TransportError::http(401, "req_sig is required")).await;
        assert!(needs_signature(&auth));

        let mismatch = failing_with(TransportError::new(ErrorClass::ProviderMismatch, "req_sig is required")).await;
        assert!(!needs_signature(&mismatch));
    }

    #[test]
    fn test_reassemble_in_index_order() {
        let bytes = reassemble(vec![Some(b"ab".to_vec()), Some(b"cd".to_vec())]).unwrap();
        assert_eq!(bytes, b"abcd");

        let err = reassemble(vec![Some(b"ab".to_vec()), None, None]).unwrap_err();
        assert!(matches!(err, RetrievalError::IncompleteDownload { ref missing, total: 3 } if missing == &vec![1, 2]));
    }

    #[test]
    fn test_verify_computed_sessions_provider_order() {
        let requests = vec![request("sp-a"), request("sp-b")];
        let computed = vec![
            ComputedSession {
                provider: "sp-b".into(),
                session_id: [1; 32],
            },
            ComputedSession {
                provider: "sp-a".into(),
                session_id: [2; 32],
            },
        ];
        let err = verify_computed_sessions(None, &[0x55; 48], &requests, &computed).unwrap_err();
        assert!(matches!(err, RetrievalError::SessionProviderMismatch { index: 0, .. }));
    }

    fn expected_id(owner: [u8; 20], provider: [u8; 20]) -> SessionId {
        hash_retrieval_session_id(&SessionIdFields {
            owner,
            deal_id: 1,
            provider,
            manifest_root: [0x55; 48],
            start_mdu_index: 0,
            start_blob_index: 0,
            blob_count: 1,
            nonce: 9,
            expires_at: 0,
        })
    }

    #[test]
    fn test_verify_computed_sessions_cross_checks_bech32_providers() {
        let caller = format!("0x{}", "11".repeat(20));
        let hrp = bech32::Hrp::parse("nil").unwrap();
        let provider = bech32::encode::<bech32::Bech32>(hrp, &[0x22; 20]).unwrap();
        let req = request(&provider);
        let expected = expected_id([0x11; 20], [0x22; 20]);

        let good = vec![ComputedSession {
            provider: provider.clone(),
            session_id: expected,
        }];
        let ids = verify_computed_sessions(Some(&caller), &[0x55; 48], &[req.clone()], &good).unwrap();
        assert_eq!(ids, vec![expected]);

        // hashed with the deal owner instead of the caller
        let wrong_owner = vec![ComputedSession {
            provider,
            session_id: expected_id([0x33; 20], [0x22; 20]),
        }];
        assert!(matches!(
            verify_computed_sessions(Some(&caller), &[0x55; 48], &[req], &wrong_owner),
            Err(RetrievalError::SessionIdMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_computed_sessions_cross_checks_hex_providers() {
        let caller = format!("0x{}", "11".repeat(20));
        let provider = format!("0x{}", "22".repeat(20));
        let req = request(&provider);

        let bad = vec![ComputedSession {
            provider,
            session_id: [0; 32],
        }];
        assert!(matches!(
            verify_computed_sessions(Some(&caller), &[0x55; 48], &[req], &bad),
            Err(RetrievalError::SessionIdMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_computed_sessions_rejects_unparseable_provider() {
        let caller = format!("0x{}", "11".repeat(20));
        let computed = vec![ComputedSession {
            provider: "sp-a".into(),
            session_id: [1; 32],
        }];
        let err = verify_computed_sessions(Some(&caller), &[0x55; 48], &[request("sp-a")], &computed).unwrap_err();
        assert!(matches!(err, RetrievalError::Core(_)));

        // without a known caller only order and count are checked
        let ids = verify_computed_sessions(None, &[0x55; 48], &[request("sp-a")], &computed).unwrap();
        assert_eq!(ids, vec![[1; 32]]);
    }

    #[test]
    fn test_count_mismatch() {
        let err = verify_computed_sessions(None, &[0x55; 48], &[request("sp-a")], &[]).unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Chain(ChainError::SessionCountMismatch { expected: 1, actual: 0 })
        ));
    }

    #[test]
    fn test_fetch_request_builder() {
        let req = FetchRequest::new("0xroot", 4, "nil1owner", "a.bin")
            .with_range(10, 20)
            .metered()
            .with_preference(RoutePreference::PreferDirectSp);
        assert_eq!(req.range_len, Some(20));
        assert!(req.metered);
        assert_eq!(req.locator().deal_id, 4);
    }
}
