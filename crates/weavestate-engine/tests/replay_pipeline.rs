//! End-to-end replay pipeline tests over in-memory fixtures.
//!
//! The ledger, loader and execution engine are all substituted with
//! in-memory implementations so every property of the pipeline (ordering,
//! caching, atomicity, nested resolution) is observable without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use weavestate_engine::{
    ContractLoader, ExecutionEngine, ExecutionResult, Interaction, InteractionHost,
    LoadedContract, Reader, ALWAYS_LATEST,
};
use weavestate_transport::{EntryPage, EntryQuery, GatewayEntry, LedgerQueryService};
use weavestate_types::{
    BlockRef, ContractId, Handler, SourceKind, Tag, APP_NAME_VALUE, TAG_APP_NAME, TAG_CONTRACT,
    TAG_INPUT,
};

// ==================== Fixtures ====================

/// Pad a seed to a well-formed 43-character ledger id.
fn ledger_id(seed: &str) -> String {
    let mut id = seed.replace(|c: char| !c.is_ascii_alphanumeric(), "_");
    while id.len() < 43 {
        id.push('x');
    }
    id.truncate(43);
    id
}

fn cid(seed: &str) -> ContractId {
    ContractId::new(ledger_id(&format!("contract_{seed}"))).unwrap()
}

fn interaction(seed: &str, contract: &ContractId, input: &str, height: u64) -> GatewayEntry {
    GatewayEntry {
        id: ledger_id(&format!("entry_{seed}")),
        owner_address: format!("caller-{seed}"),
        tags: vec![
            Tag::new(TAG_APP_NAME, APP_NAME_VALUE),
            Tag::new(TAG_CONTRACT, contract.as_str()),
            Tag::new(TAG_INPUT, input),
        ],
        block: Some(BlockRef {
            height,
            id: format!("{:b<60}{height:04}", "b"),
            timestamp: 1_600_000_000 + height,
        }),
        parent_id: None,
    }
}

/// In-memory gateway: serves whatever entries it holds, in insertion order,
/// paginated in tiny pages so multi-page assembly is always exercised.
struct MockLedger {
    entries: Mutex<Vec<GatewayEntry>>,
    head: Mutex<u64>,
    page_cap: usize,
    queries: AtomicUsize,
    head_queries: AtomicUsize,
    failing: Mutex<bool>,
}

impl MockLedger {
    fn new(head: u64) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            head: Mutex::new(head),
            page_cap: 2,
            queries: AtomicUsize::new(0),
            head_queries: AtomicUsize::new(0),
            failing: Mutex::new(false),
        })
    }

    fn push(&self, entry: GatewayEntry) {
        self.entries.lock().push(entry);
    }

    fn set_head(&self, head: u64) {
        *self.head.lock() = head;
    }

    fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerQueryService for MockLedger {
    async fn query_entries(&self, query: &EntryQuery, cursor: Option<&str>) -> Result<EntryPage> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock() {
            bail!("gateway unavailable");
        }

        let all = self.entries.lock();
        let matches: Vec<GatewayEntry> = all
            .iter()
            .filter(|entry| {
                let targeted = entry.tags.iter().any(|tag| {
                    tag.name == TAG_CONTRACT
                        && query.contracts.iter().any(|c| c.as_str() == tag.value)
                });
                // Unconfirmed entries have no height to filter on; a real
                // gateway can still surface them.
                let in_range = entry.block.as_ref().map_or(true, |block| {
                    block.height >= query.min_height && block.height <= query.max_height
                });
                targeted && in_range
            })
            .cloned()
            .collect();

        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + query.page_size.min(self.page_cap)).min(matches.len());
        let has_next_page = end < matches.len();
        Ok(EntryPage {
            entries: matches[start..end].to_vec(),
            has_next_page,
            end_cursor: has_next_page.then(|| end.to_string()),
        })
    }

    async fn head_height(&self) -> Result<u64> {
        self.head_queries.fetch_add(1, Ordering::SeqCst);
        Ok(*self.head.lock())
    }
}

/// A "compiled" test handler: just the source text, interpreted by
/// `MockEngine`.
struct TestProgram {
    code: String,
}

struct SourceSpec {
    source_id: String,
    owner: String,
    code: String,
    init_state: Value,
}

struct MockLoader {
    contracts: Mutex<HashMap<ContractId, SourceSpec>>,
}

impl MockLoader {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            contracts: Mutex::new(HashMap::new()),
        })
    }

    fn define(&self, id: &ContractId, source_id: &str, code: &str, init_state: Value) {
        self.contracts.lock().insert(
            id.clone(),
            SourceSpec {
                source_id: source_id.to_string(),
                owner: format!("owner-of-{source_id}"),
                code: code.to_string(),
                init_state,
            },
        );
    }
}

#[async_trait]
impl ContractLoader for MockLoader {
    async fn load(&self, id: &ContractId, source_override: Option<&str>) -> Result<LoadedContract> {
        let contracts = self.contracts.lock();
        let source = contracts
            .get(id)
            .ok_or_else(|| anyhow!("no contract-defining entry for {id}"))?;
        Ok(LoadedContract {
            source_id: source_override.unwrap_or(&source.source_id).to_string(),
            owner: source.owner.clone(),
            handler: Handler::new(TestProgram {
                code: source.code.clone(),
            }),
            init_state: source.init_state.clone(),
        })
    }
}

/// Interprets `TestProgram` handlers:
/// - `{"function":"add","amount":n}` adds to `state.count`
/// - `{"function":"mul","amount":n}` multiplies `state.count` (order-sensitive)
/// - `{"function":"reject"}` rejects, state unchanged
/// - `{"function":"readOther","target":id[,"height":h]}` nested read into
///   `state.other`
struct MockEngine;

#[async_trait]
impl ExecutionEngine for MockEngine {
    async fn execute(
        &self,
        handler: &Handler,
        interaction: Interaction,
        mut state: Value,
        host: &mut dyn InteractionHost,
    ) -> Result<ExecutionResult> {
        handler
            .downcast_ref::<TestProgram>()
            .ok_or_else(|| anyhow!("foreign handler"))?;

        let function = interaction
            .input
            .get("function")
            .and_then(|f| f.as_str())
            .unwrap_or("");
        let amount = interaction
            .input
            .get("amount")
            .and_then(|a| a.as_u64())
            .unwrap_or(0);
        let count = state.get("count").and_then(|c| c.as_u64()).unwrap_or(0);

        match function {
            "add" => {
                state["count"] = json!(count + amount);
                Ok(ExecutionResult {
                    accepted: true,
                    state,
                })
            }
            "mul" => {
                state["count"] = json!(count * amount);
                Ok(ExecutionResult {
                    accepted: true,
                    state,
                })
            }
            "reject" => Ok(ExecutionResult {
                accepted: false,
                state,
            }),
            "readOther" => {
                let target: ContractId = interaction
                    .input
                    .get("target")
                    .and_then(|t| t.as_str())
                    .ok_or_else(|| anyhow!("readOther without target"))?
                    .parse()?;
                let height = interaction.input.get("height").and_then(|h| h.as_u64());
                let nested = host.read_contract_state(&target, height, false).await?;
                state["other"] = nested.state;
                Ok(ExecutionResult {
                    accepted: true,
                    state,
                })
            }
            _ => Ok(ExecutionResult {
                accepted: false,
                state,
            }),
        }
    }

    fn classify(&self, handler: &Handler) -> SourceKind {
        let recursive = handler
            .downcast_ref::<TestProgram>()
            .map(|p| p.code.contains("readContractState"))
            .unwrap_or(false);
        if recursive {
            SourceKind::Recursive
        } else {
            SourceKind::Plain
        }
    }
}

const PLAIN_CODE: &str = "function handle(state, action) { return { state } }";
const RECURSIVE_CODE: &str =
    "async function handle(state, action) { await SmartWeave.contracts.readContractState(id) }";

struct Fixture {
    ledger: Arc<MockLedger>,
    loader: Arc<MockLoader>,
    reader: Reader,
}

fn fixture(head: u64) -> Fixture {
    let ledger = MockLedger::new(head);
    let loader = MockLoader::new();
    let reader = Reader::new(
        Arc::clone(&ledger) as Arc<dyn LedgerQueryService>,
        Arc::clone(&loader) as Arc<dyn ContractLoader>,
        Arc::new(MockEngine),
    );
    Fixture {
        ledger,
        loader,
        reader,
    }
}

/// A plain counter contract with `add` entries at heights 10 and 20.
fn counter_fixture(head: u64) -> (Fixture, ContractId) {
    let fix = fixture(head);
    let a = cid("a");
    fix.loader
        .define(&a, "src-counter", PLAIN_CODE, json!({"count": 0}));
    fix.ledger
        .push(interaction("a10", &a, r#"{"function":"add","amount":1}"#, 10));
    fix.ledger
        .push(interaction("a20", &a, r#"{"function":"add","amount":3}"#, 20));
    (fix, a)
}

// ==================== Scenarios ====================

#[tokio::test]
async fn replays_counter_history_to_requested_height() {
    let (fix, a) = counter_fixture(20);
    let result = fix
        .reader
        .read_state_with_validity(&a, Some(20))
        .await
        .unwrap();
    assert_eq!(result.state, json!({"count": 4}));
    assert_eq!(result.validity.len(), 2);
    assert_eq!(result.validity.get(&ledger_id("entry_a10")), Some(true));
    assert_eq!(result.validity.get(&ledger_id("entry_a20")), Some(true));

    // A fresh cache replays only up to the requested cut.
    let (fix, a) = counter_fixture(20);
    let state = fix.reader.read_state(&a, Some(15)).await.unwrap();
    assert_eq!(state, json!({"count": 1}));
}

#[tokio::test]
async fn repeated_reads_are_idempotent_and_fetch_nothing() {
    let (fix, a) = counter_fixture(20);
    let first = fix.reader.read_state(&a, Some(20)).await.unwrap();
    let fetched = fix.ledger.query_count();
    assert!(fetched > 0);

    let second = fix.reader.read_state(&a, Some(20)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fix.ledger.query_count(), fetched);
}

#[tokio::test]
async fn committed_height_is_monotonic_and_backwards_reads_clamp() {
    let (fix, a) = counter_fixture(20);
    fix.reader.read_state(&a, Some(20)).await.unwrap();
    assert_eq!(fix.reader.committed_height(), 20);

    // The cache never rewinds: a read below the committed height serves the
    // committed state.
    let state = fix.reader.read_state(&a, Some(10)).await.unwrap();
    assert_eq!(state, json!({"count": 4}));
    assert_eq!(fix.reader.committed_height(), 20);
}

#[tokio::test]
async fn replay_order_is_canonical_regardless_of_arrival_order() {
    // add 1 @5, mul 10 @10, add 3 @20 is order-sensitive: 13 only in
    // canonical order.
    let entries = |a: &ContractId| {
        vec![
            interaction("o5", a, r#"{"function":"add","amount":1}"#, 5),
            interaction("o10", a, r#"{"function":"mul","amount":10}"#, 10),
            interaction("o20", a, r#"{"function":"add","amount":3}"#, 20),
        ]
    };

    let mut states = Vec::new();
    for permutation in [[0usize, 1, 2], [2, 1, 0], [1, 2, 0]] {
        let fix = fixture(20);
        let a = cid("ord");
        fix.loader
            .define(&a, "src-ord", PLAIN_CODE, json!({"count": 0}));
        let batch = entries(&a);
        for index in permutation {
            fix.ledger.push(batch[index].clone());
        }
        states.push(fix.reader.read_state(&a, Some(20)).await.unwrap());
    }

    assert_eq!(states[0], json!({"count": 13}));
    assert_eq!(states[0], states[1]);
    assert_eq!(states[1], states[2]);
}

#[tokio::test]
async fn failed_fetch_leaves_the_committed_cache_untouched() {
    let (fix, a) = counter_fixture(20);
    fix.reader.read_state(&a, Some(20)).await.unwrap();

    fix.ledger
        .push(interaction("a25", &a, r#"{"function":"add","amount":5}"#, 25));
    fix.ledger.set_head(30);
    fix.ledger.set_failing(true);

    let err = fix.reader.read_state(&a, Some(30)).await.unwrap_err();
    assert!(err.to_string().contains("gateway unavailable"));

    // Bit-identical committed cache: same height, same state.
    assert_eq!(fix.reader.committed_height(), 20);
    let state = fix.reader.read_state(&a, Some(20)).await.unwrap();
    assert_eq!(state, json!({"count": 4}));
}

#[tokio::test]
async fn unconfirmed_entries_abort_the_cycle() {
    let fix = fixture(20);
    let a = cid("pending");
    fix.loader
        .define(&a, "src-pending", PLAIN_CODE, json!({"count": 0}));
    let mut pending = interaction("p10", &a, r#"{"function":"add","amount":1}"#, 10);
    pending.block = None;
    fix.ledger.push(pending);

    let err = fix.reader.read_state(&a, Some(20)).await.unwrap_err();
    assert!(err.to_string().contains("not yet confirmed"));
    assert_eq!(fix.reader.committed_height(), 0);
}

#[tokio::test]
async fn export_import_round_trip_reproduces_state_and_validity() {
    let (fix, a) = counter_fixture(20);
    let original = fix
        .reader
        .read_state_with_validity(&a, Some(20))
        .await
        .unwrap();

    let blob = fix.reader.export_cache(None);
    assert_eq!(blob.height, 20);

    // A cold process: same loader universe, empty ledger.
    let cold = fixture(20);
    cold.loader
        .define(&a, "src-counter", PLAIN_CODE, json!({"count": 0}));
    cold.reader.import_cache(blob).await.unwrap();

    let restored = cold
        .reader
        .read_state_with_validity(&a, Some(20))
        .await
        .unwrap();
    assert_eq!(restored.state, original.state);
    assert_eq!(restored.validity, original.validity);
    // Served from the imported snapshot: the cold ledger was never queried.
    assert_eq!(cold.ledger.query_count(), 0);
}

#[tokio::test]
async fn malformed_inputs_are_skipped_without_validity_records() {
    let fix = fixture(20);
    let a = cid("mixed");
    fix.loader
        .define(&a, "src-mixed", PLAIN_CODE, json!({"count": 0}));
    fix.ledger
        .push(interaction("m10", &a, r#"{"function":"add","amount":1}"#, 10));
    fix.ledger.push(interaction("m12", &a, "not json", 12));
    fix.ledger.push(interaction("m14", &a, "null", 14));
    fix.ledger
        .push(interaction("m16", &a, r#"{"function":"reject"}"#, 16));

    let result = fix
        .reader
        .read_state_with_validity(&a, Some(20))
        .await
        .unwrap();
    // Malformed entries leave no trace; the rejection is recorded but does
    // not change state.
    assert_eq!(result.state, json!({"count": 1}));
    assert_eq!(result.validity.len(), 2);
    assert_eq!(result.validity.get(&ledger_id("entry_m10")), Some(true));
    assert_eq!(result.validity.get(&ledger_id("entry_m16")), Some(false));
}

#[tokio::test]
async fn plain_nested_target_resolves_inline_at_the_replay_cut() {
    let fix = fixture(20);
    let r = cid("reader");
    let b = cid("plainb");
    fix.loader
        .define(&r, "src-reader", RECURSIVE_CODE, json!({}));
    fix.loader
        .define(&b, "src-plainb", PLAIN_CODE, json!({"count": 0}));

    fix.ledger
        .push(interaction("b5", &b, r#"{"function":"add","amount":2}"#, 5));
    fix.ledger
        .push(interaction("b15", &b, r#"{"function":"add","amount":10}"#, 15));
    let read_other = format!(r#"{{"function":"readOther","target":"{b}"}}"#);
    fix.ledger.push(interaction("r10", &r, &read_other, 10));

    let result = fix.reader.read_state(&r, Some(20)).await.unwrap();
    // The nested read observed B at the in-flight height 10: only the
    // height-5 entry had been folded.
    assert_eq!(result["other"], json!({"count": 2}));

    // B's remaining history drained through the shared queue before commit.
    let queries = fix.ledger.query_count();
    let b_state = fix.reader.read_state(&b, Some(20)).await.unwrap();
    assert_eq!(b_state, json!({"count": 12}));
    assert_eq!(fix.ledger.query_count(), queries);

    // B's full history is visible in an export that includes it.
    let blob = fix.reader.export_cache(Some(std::slice::from_ref(&b)));
    let exported = &blob.contracts[&b];
    assert_eq!(exported.validity.len(), 2);
    assert_eq!(exported.kind, SourceKind::Plain);
}

#[tokio::test]
async fn recursive_nested_target_stays_deferred_until_the_queue_drains() {
    let fix = fixture(20);
    let r1 = cid("recone");
    let r2 = cid("rectwo");
    fix.loader
        .define(&r1, "src-recone", RECURSIVE_CODE, json!({}));
    fix.loader
        .define(&r2, "src-rectwo", RECURSIVE_CODE, json!({"count": 0}));

    // Height 5 precedes the in-flight height and is outside the deferred
    // fetch window; height 15 joins the shared queue.
    fix.ledger
        .push(interaction("r2a", &r2, r#"{"function":"add","amount":7}"#, 5));
    fix.ledger
        .push(interaction("r2b", &r2, r#"{"function":"add","amount":2}"#, 15));
    let read_other = format!(r#"{{"function":"readOther","target":"{r2}"}}"#);
    fix.ledger.push(interaction("r1a", &r1, &read_other, 10));

    let result = fix.reader.read_state(&r1, Some(20)).await.unwrap();
    // The nested read saw R2 at its initial state.
    assert_eq!(result["other"], json!({"count": 0}));

    let r2_result = fix
        .reader
        .read_state_with_validity(&r2, Some(20))
        .await
        .unwrap();
    assert_eq!(r2_result.state, json!({"count": 2}));
    assert_eq!(r2_result.validity.len(), 1);
    assert_eq!(r2_result.validity.get(&ledger_id("entry_r2b")), Some(true));
}

#[tokio::test]
async fn plain_contracts_may_not_issue_nested_reads() {
    let fix = fixture(20);
    let r = cid("outer");
    let p = cid("sneaky");
    let a = cid("victim");
    fix.loader
        .define(&r, "src-outer", RECURSIVE_CODE, json!({}));
    // Classified plain, but its history tries to nest anyway.
    fix.loader.define(&p, "src-sneaky", PLAIN_CODE, json!({}));
    fix.loader.define(&a, "src-victim", PLAIN_CODE, json!({}));

    let sneaky_input = format!(r#"{{"function":"readOther","target":"{a}"}}"#);
    fix.ledger.push(interaction("p5", &p, &sneaky_input, 5));
    let read_other = format!(r#"{{"function":"readOther","target":"{p}"}}"#);
    fix.ledger.push(interaction("r10", &r, &read_other, 10));

    let err = fix.reader.read_state(&r, Some(20)).await.unwrap_err();
    assert!(err.to_string().contains("nested read"));
    assert_eq!(fix.reader.committed_height(), 0);
}

#[tokio::test]
async fn nested_reads_at_a_foreign_height_abort_the_cycle() {
    let fix = fixture(20);
    let r = cid("timewarp");
    let b = cid("target");
    fix.loader
        .define(&r, "src-timewarp", RECURSIVE_CODE, json!({}));
    fix.loader.define(&b, "src-target", PLAIN_CODE, json!({}));

    let read_other = format!(r#"{{"function":"readOther","target":"{b}","height":5}}"#);
    fix.ledger.push(interaction("t10", &r, &read_other, 10));

    let err = fix.reader.read_state(&r, Some(20)).await.unwrap_err();
    assert!(err
        .to_string()
        .contains("does not match in-flight replay height"));
    assert_eq!(fix.reader.committed_height(), 0);
}

#[tokio::test]
async fn always_latest_forces_a_full_recompute_to_head() {
    let (fix, a) = counter_fixture(20);
    fix.reader.read_state(&a, None).await.unwrap();
    assert_eq!(fix.reader.committed_height(), 20);

    // New history lands and the head advances; a refresh read may not serve
    // the stale snapshot.
    fix.ledger
        .push(interaction("a25", &a, r#"{"function":"add","amount":5}"#, 25));
    fix.ledger.set_head(25);

    let state = fix
        .reader
        .read_state(&a, Some(ALWAYS_LATEST))
        .await
        .unwrap();
    assert_eq!(state, json!({"count": 9}));
    assert_eq!(fix.reader.committed_height(), 25);
}

#[tokio::test]
async fn unknown_contracts_surface_loader_errors_without_cache_mutation() {
    let fix = fixture(20);
    let ghost = cid("ghost");

    let err = fix.reader.read_state(&ghost, Some(10)).await.unwrap_err();
    assert!(err.to_string().contains("not found"));
    assert_eq!(fix.reader.committed_height(), 0);
}

#[tokio::test]
async fn recursive_only_export_filters_plain_contracts() {
    let fix = fixture(20);
    let r = cid("recexp");
    let b = cid("plainexp");
    fix.loader
        .define(&r, "src-recexp", RECURSIVE_CODE, json!({}));
    fix.loader
        .define(&b, "src-plainexp", PLAIN_CODE, json!({"count": 0}));

    fix.ledger
        .push(interaction("x5", &b, r#"{"function":"add","amount":2}"#, 5));
    let read_other = format!(r#"{{"function":"readOther","target":"{b}"}}"#);
    fix.ledger.push(interaction("x10", &r, &read_other, 10));

    fix.reader.read_state(&r, Some(20)).await.unwrap();

    let blob = fix.reader.export_recursive_cache();
    assert!(blob.contracts.contains_key(&r));
    assert!(!blob.contracts.contains_key(&b));
}
