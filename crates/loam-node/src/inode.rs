//! The inode value: a hash-consed, chunked representation of large
//! directory-like maps.
//!
//! A value is either a leaf chunk of up to `entries` bindings or an interior
//! chunk of child pointers indexed by the step ordering. Values are logically
//! immutable: `add` and `remove` return new values sharing every unchanged
//! subtree. Small roots are *stable* and hash as the flat map they represent,
//! so their hash is independent of the internal chunking.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use loam_types::{Key, ObjectHash, Step, TreeConfig, Value};

use crate::bin::{flat_hash, Bin, BinV, PtrRef};
use crate::error::{NodeError, NodeResult};
use crate::integrity::{check_bin, IntegrityError};
use crate::ordering::StepOrdering;
use crate::store::NodeStore;

/// Ownership mode of a tree, fixed at construction.
pub(crate) enum Mode {
    /// Fully in memory; children are owned outright.
    Total,
    /// Children may be lazy keys resolved through the store on demand.
    Partial(Arc<dyn NodeStore>),
    /// Deserialised without a store: unresolved children are unreachable.
    Truncated,
}

pub(crate) struct NodeContext {
    pub(crate) conf: TreeConfig,
    pub(crate) ordering: StepOrdering,
    pub(crate) mode: Mode,
}

/// Memoised hash / key reference of one chunk.
///
/// The reference starts unknown, may memoise a computed hash, and is
/// promoted to a key once the chunk is persisted or located in the index.
/// Promotion is monotone: a key never reverts, and a promotion whose hash
/// disagrees with the memoised one is rejected.
struct VRef {
    state: RwLock<VRefState>,
}

#[derive(Clone, Copy)]
enum VRefState {
    Unknown,
    Hash(ObjectHash),
    Key(Key),
}

impl VRef {
    fn unknown() -> Self {
        Self {
            state: RwLock::new(VRefState::Unknown),
        }
    }

    fn of_key(key: Key) -> Self {
        Self {
            state: RwLock::new(VRefState::Key(key)),
        }
    }

    fn known_key(&self) -> Option<Key> {
        match *self.state.read().expect("lock poisoned") {
            VRefState::Key(k) => Some(k),
            _ => None,
        }
    }

    fn known_hash(&self) -> Option<ObjectHash> {
        match *self.state.read().expect("lock poisoned") {
            VRefState::Unknown => None,
            VRefState::Hash(h) => Some(h),
            VRefState::Key(k) => Some(k.hash()),
        }
    }

    fn hash_with(&self, compute: impl FnOnce() -> NodeResult<ObjectHash>) -> NodeResult<ObjectHash> {
        if let Some(h) = self.known_hash() {
            return Ok(h);
        }
        let h = compute()?;
        let mut state = self.state.write().expect("lock poisoned");
        if let VRefState::Unknown = *state {
            *state = VRefState::Hash(h);
        }
        Ok(h)
    }

    fn promote(&self, key: Key) -> NodeResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        match *state {
            VRefState::Unknown => {
                *state = VRefState::Key(key);
                Ok(())
            }
            VRefState::Hash(h) => {
                if h != key.hash() {
                    return Err(NodeError::KeyHashMismatch {
                        had: h,
                        got: key.hash(),
                    });
                }
                *state = VRefState::Key(key);
                Ok(())
            }
            VRefState::Key(k) => {
                if k.hash() != key.hash() {
                    return Err(NodeError::KeyHashMismatch {
                        had: k.hash(),
                        got: key.hash(),
                    });
                }
                if k.hint().is_none() && key.hint().is_some() {
                    *state = VRefState::Key(key);
                }
                Ok(())
            }
        }
    }
}

pub(crate) struct Inner {
    root: bool,
    v: V,
    vref: VRef,
}

enum V {
    Values(BTreeMap<Step, Value>),
    Tree(TreeNode),
}

struct TreeNode {
    depth: usize,
    length: u64,
    slots: Vec<Option<Arc<Ptr>>>,
}

/// A child pointer. The state cell is the only interior mutability in the
/// whole value: it caches resolutions and records save promotions.
struct Ptr {
    state: RwLock<PtrState>,
}

#[derive(Clone)]
enum PtrState {
    /// Total: the child is owned outright.
    Owned(Arc<Inner>),
    /// Partial: known by key, not yet loaded.
    Lazy(Key),
    /// Partial: loaded and cached; droppable by `clear`.
    LazyLoaded { key: Key, target: Arc<Inner> },
    /// Partial: mutated in memory, preserved until saved.
    Dirty(Arc<Inner>),
    /// Truncated: unreachable, the deserialiser had no store.
    Broken(PtrRef),
    /// Truncated: materialised in memory.
    Intact(Arc<Inner>),
}

impl Ptr {
    fn new(state: PtrState) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(state),
        })
    }
}

fn should_be_stable(conf: &TreeConfig, length: u64, root: bool) -> bool {
    length == 0 || (root && length <= conf.stable_hash as u64)
}

fn inner_length(inner: &Inner) -> u64 {
    match &inner.v {
        V::Values(map) => map.len() as u64,
        V::Tree(t) => t.length,
    }
}

/// State a freshly-built in-memory child takes in each mode.
fn owned_state(ctx: &NodeContext, inner: Arc<Inner>) -> PtrState {
    match ctx.mode {
        Mode::Total => PtrState::Owned(inner),
        Mode::Partial(_) => PtrState::Dirty(inner),
        Mode::Truncated => PtrState::Intact(inner),
    }
}

fn resolve_ptr(ctx: &NodeContext, ptr: &Ptr, cache: bool) -> NodeResult<Arc<Inner>> {
    let key = {
        let state = ptr.state.read().expect("lock poisoned");
        match &*state {
            PtrState::Owned(t)
            | PtrState::Dirty(t)
            | PtrState::Intact(t)
            | PtrState::LazyLoaded { target: t, .. } => return Ok(Arc::clone(t)),
            PtrState::Broken(r) => return Err(NodeError::DanglingHash(r.hash())),
            PtrState::Lazy(k) => *k,
        }
    };

    let store = match &ctx.mode {
        Mode::Partial(store) => Arc::clone(store),
        _ => return Err(NodeError::DanglingHash(key.hash())),
    };
    let bin = store
        .find_node(&key)?
        .ok_or_else(|| NodeError::DanglingHash(key.hash()))?;
    let target = Arc::new(inner_of_bin(ctx, &bin, VRef::of_key(key))?);

    if cache {
        let mut state = ptr.state.write().expect("lock poisoned");
        // Tolerate a concurrent promoter: identical data, either copy wins.
        if let PtrState::Lazy(k) = *state {
            *state = PtrState::LazyLoaded {
                key: k,
                target: Arc::clone(&target),
            };
        }
    }
    Ok(target)
}

fn inner_of_bin(ctx: &NodeContext, bin: &Bin, vref: VRef) -> NodeResult<Inner> {
    let v = match &bin.v {
        BinV::Values(bindings) => {
            let map: BTreeMap<Step, Value> = bindings.iter().cloned().collect();
            V::Values(map)
        }
        BinV::Tree {
            depth,
            length,
            ptrs,
        } => {
            let mut slots: Vec<Option<Arc<Ptr>>> = vec![None; ctx.conf.entries];
            for (slot, ptr) in ptrs {
                if *slot >= ctx.conf.entries {
                    return Err(NodeError::CorruptedEntry {
                        offset: 0,
                        field: "slot".into(),
                    });
                }
                let state = match &ctx.mode {
                    Mode::Partial(_) => {
                        let key = match ptr {
                            PtrRef::Key(k) => *k,
                            PtrRef::Hash(h) => Key::unhinted(*h),
                        };
                        PtrState::Lazy(key)
                    }
                    _ => PtrState::Broken(*ptr),
                };
                slots[*slot] = Some(Ptr::new(state));
            }
            V::Tree(TreeNode {
                depth: *depth,
                length: *length,
                slots,
            })
        }
    };
    Ok(Inner {
        root: bin.root,
        v,
        vref,
    })
}

fn empty_tree(ctx: &NodeContext, depth: usize) -> NodeResult<TreeNode> {
    if depth >= ctx.conf.max_depth() {
        return Err(NodeError::MaxDepth(depth));
    }
    Ok(TreeNode {
        depth,
        length: 0,
        slots: vec![None; ctx.conf.entries],
    })
}

fn find_value(ctx: &NodeContext, inner: &Inner, step: &Step) -> NodeResult<Option<Value>> {
    match &inner.v {
        V::Values(map) => Ok(map.get(step).copied()),
        V::Tree(t) => {
            let slot = ctx.ordering.bucket(&ctx.conf, step, t.depth)?;
            match &t.slots[slot] {
                None => Ok(None),
                Some(ptr) => {
                    let child = resolve_ptr(ctx, ptr, true)?;
                    find_value(ctx, &child, step)
                }
            }
        }
    }
}

fn add_rec(
    ctx: &NodeContext,
    v: &V,
    depth: usize,
    step: &Step,
    value: Value,
) -> NodeResult<(V, bool)> {
    match v {
        V::Values(map) => {
            let replaced = map.contains_key(step);
            if !replaced && map.len() + 1 > ctx.conf.entries {
                // Split: re-insert every binding through the normal path so
                // each lands in its bucket.
                let mut tree = empty_tree(ctx, depth)?;
                for (s, val) in map {
                    let (t, _) = tree_add(ctx, &tree, s, *val)?;
                    tree = t;
                }
                let (tree, added) = tree_add(ctx, &tree, step, value)?;
                Ok((V::Tree(tree), added))
            } else {
                let mut map = map.clone();
                map.insert(step.clone(), value);
                Ok((V::Values(map), !replaced))
            }
        }
        V::Tree(t) => {
            let (t, added) = tree_add(ctx, t, step, value)?;
            Ok((V::Tree(t), added))
        }
    }
}

fn tree_add(
    ctx: &NodeContext,
    t: &TreeNode,
    step: &Step,
    value: Value,
) -> NodeResult<(TreeNode, bool)> {
    let slot = ctx.ordering.bucket(&ctx.conf, step, t.depth)?;
    let mut slots = t.slots.clone();
    let (child, added) = match &slots[slot] {
        None => {
            let mut map = BTreeMap::new();
            map.insert(step.clone(), value);
            (
                Inner {
                    root: false,
                    v: V::Values(map),
                    vref: VRef::unknown(),
                },
                true,
            )
        }
        Some(ptr) => {
            let target = resolve_ptr(ctx, ptr, true)?;
            let (v, added) = add_rec(ctx, &target.v, t.depth + 1, step, value)?;
            (
                Inner {
                    root: false,
                    v,
                    vref: VRef::unknown(),
                },
                added,
            )
        }
    };
    slots[slot] = Some(Ptr::new(owned_state(ctx, Arc::new(child))));
    Ok((
        TreeNode {
            depth: t.depth,
            length: t.length + added as u64,
            slots,
        },
        added,
    ))
}

fn remove_rec(ctx: &NodeContext, v: &V, step: &Step) -> NodeResult<V> {
    match v {
        V::Values(map) => {
            let mut map = map.clone();
            map.remove(step);
            Ok(V::Values(map))
        }
        V::Tree(t) => {
            let slot = ctx.ordering.bucket(&ctx.conf, step, t.depth)?;
            let ptr = match &t.slots[slot] {
                Some(p) => p,
                // The caller verified presence; an empty slot means the step
                // was never bound here.
                None => {
                    return Ok(V::Tree(TreeNode {
                        depth: t.depth,
                        length: t.length,
                        slots: t.slots.clone(),
                    }))
                }
            };
            let child = resolve_ptr(ctx, ptr, true)?;
            let mut slots = t.slots.clone();
            if inner_length(&child) == 1 {
                slots[slot] = None;
            } else {
                let v = remove_rec(ctx, &child.v, step)?;
                slots[slot] = Some(Ptr::new(owned_state(
                    ctx,
                    Arc::new(Inner {
                        root: false,
                        v,
                        vref: VRef::unknown(),
                    }),
                )));
            }
            let tree = TreeNode {
                depth: t.depth,
                length: t.length - 1,
                slots,
            };
            if tree.length <= ctx.conf.entries as u64 {
                // Collapse the whole subtree into one leaf chunk.
                let mut bindings = Vec::with_capacity(tree.length as usize);
                collect_tree(ctx, &tree, &mut bindings, true)?;
                Ok(V::Values(bindings.into_iter().collect()))
            } else {
                Ok(V::Tree(tree))
            }
        }
    }
}

fn collect_inner(
    ctx: &NodeContext,
    inner: &Inner,
    out: &mut Vec<(Step, Value)>,
    cache: bool,
) -> NodeResult<()> {
    match &inner.v {
        V::Values(map) => {
            out.extend(map.iter().map(|(s, v)| (s.clone(), *v)));
            Ok(())
        }
        V::Tree(t) => collect_tree(ctx, t, out, cache),
    }
}

fn collect_tree(
    ctx: &NodeContext,
    t: &TreeNode,
    out: &mut Vec<(Step, Value)>,
    cache: bool,
) -> NodeResult<()> {
    for ptr in t.slots.iter().flatten() {
        let child = resolve_ptr(ctx, ptr, cache)?;
        collect_inner(ctx, &child, out, cache)?;
    }
    Ok(())
}

fn ptr_ref(ctx: &NodeContext, ptr: &Ptr) -> NodeResult<PtrRef> {
    let state = ptr.state.read().expect("lock poisoned");
    match &*state {
        PtrState::Lazy(k) => Ok(PtrRef::Key(*k)),
        PtrState::LazyLoaded { key, .. } => Ok(PtrRef::Key(*key)),
        PtrState::Broken(r) => Ok(*r),
        PtrState::Owned(t) | PtrState::Dirty(t) | PtrState::Intact(t) => {
            match t.vref.known_key() {
                Some(k) => Ok(PtrRef::Key(k)),
                None => Ok(PtrRef::Hash(inner_hash(ctx, t)?)),
            }
        }
    }
}

fn inner_to_bin(ctx: &NodeContext, inner: &Inner) -> NodeResult<Bin> {
    match &inner.v {
        V::Values(map) => Ok(Bin::values(
            inner.root,
            map.iter().map(|(s, v)| (s.clone(), *v)).collect(),
        )),
        V::Tree(t) => {
            let mut ptrs = Vec::new();
            for (slot, ptr) in t.slots.iter().enumerate() {
                if let Some(ptr) = ptr {
                    ptrs.push((slot, ptr_ref(ctx, ptr)?));
                }
            }
            Ok(Bin::tree(inner.root, t.depth, t.length, ptrs))
        }
    }
}

fn compute_hash(ctx: &NodeContext, inner: &Inner) -> NodeResult<ObjectHash> {
    let length = inner_length(inner);
    if should_be_stable(&ctx.conf, length, inner.root) {
        let mut bindings = Vec::with_capacity(length as usize);
        collect_inner(ctx, inner, &mut bindings, true)?;
        Ok(flat_hash(&bindings))
    } else {
        Ok(inner_to_bin(ctx, inner)?.structural_hash())
    }
}

fn inner_hash(ctx: &NodeContext, inner: &Inner) -> NodeResult<ObjectHash> {
    inner.vref.hash_with(|| compute_hash(ctx, inner))
}

fn clear_inner(inner: &Inner) {
    if let V::Tree(t) = &inner.v {
        for ptr in t.slots.iter().flatten() {
            let target = {
                let mut state = ptr.state.write().expect("lock poisoned");
                match &*state {
                    PtrState::LazyLoaded { key, .. } => {
                        *state = PtrState::Lazy(*key);
                        None
                    }
                    PtrState::Owned(t) | PtrState::Dirty(t) | PtrState::Intact(t) => {
                        Some(Arc::clone(t))
                    }
                    PtrState::Lazy(_) | PtrState::Broken(_) => None,
                }
            };
            if let Some(target) = target {
                clear_inner(&target);
            }
        }
    }
}

fn save_inner(
    ctx: &NodeContext,
    inner: &Inner,
    store: &dyn NodeStore,
    clear: bool,
) -> NodeResult<Key> {
    if let Some(key) = inner.vref.known_key() {
        if store.mem(&key)? {
            return Ok(key);
        }
    }
    if let V::Tree(t) = &inner.v {
        for ptr in t.slots.iter().flatten() {
            save_child(ctx, ptr, store, clear)?;
        }
    }
    let hash = inner_hash(ctx, inner)?;
    let bin = inner_to_bin(ctx, inner)?;
    let key = store.append_node(&hash, &bin)?;
    inner.vref.promote(key)?;
    Ok(key)
}

fn save_child(ctx: &NodeContext, ptr: &Ptr, store: &dyn NodeStore, clear: bool) -> NodeResult<()> {
    let state = ptr.state.read().expect("lock poisoned").clone();
    match state {
        // Already keyed on disk.
        PtrState::Lazy(_) => Ok(()),
        PtrState::Dirty(target) => {
            let key = save_inner(ctx, &target, store, clear)?;
            let mut state = ptr.state.write().expect("lock poisoned");
            if matches!(*state, PtrState::Dirty(_)) {
                *state = if clear {
                    PtrState::Lazy(key)
                } else {
                    PtrState::LazyLoaded { key, target }
                };
            }
            Ok(())
        }
        PtrState::Owned(target) | PtrState::Intact(target) => {
            ensure_child_key(ctx, &target, store, clear).map(|_| ())
        }
        PtrState::LazyLoaded { target, .. } => {
            ensure_child_key(ctx, &target, store, clear).map(|_| ())
        }
        PtrState::Broken(r) => match r {
            PtrRef::Key(_) => Ok(()),
            PtrRef::Hash(h) => match store.index(&h)? {
                Some(key) => {
                    let mut state = ptr.state.write().expect("lock poisoned");
                    if matches!(*state, PtrState::Broken(_)) {
                        *state = PtrState::Broken(PtrRef::Key(key));
                    }
                    Ok(())
                }
                None => Err(NodeError::UnknownHashAtTruncatedBoundary(h)),
            },
        },
    }
}

fn ensure_child_key(
    ctx: &NodeContext,
    target: &Inner,
    store: &dyn NodeStore,
    clear: bool,
) -> NodeResult<Key> {
    if let Some(key) = target.vref.known_key() {
        if store.mem(&key)? {
            return Ok(key);
        }
    } else {
        let hash = inner_hash(ctx, target)?;
        if let Some(key) = store.index(&hash)? {
            if store.mem(&key)? {
                target.vref.promote(key)?;
                return Ok(key);
            }
            // Allowed but rare: the index knows the hash while the entry is
            // gone. Recurse and re-append.
            warn!(hash = %hash, "index resolved a key whose entry is absent, re-appending");
        }
    }
    save_inner(ctx, target, store, clear)
}

fn absent(err: NodeError) -> IntegrityError {
    let hash = match err {
        NodeError::DanglingHash(h) | NodeError::UnknownHashAtTruncatedBoundary(h) => h,
        _ => ObjectHash::null(),
    };
    IntegrityError::AbsentValue { hash }
}

fn check_inner(ctx: &NodeContext, inner: &Inner, depth: usize) -> Result<(), IntegrityError> {
    match &inner.v {
        V::Values(map) => {
            if map.is_empty() && !inner.root {
                return Err(IntegrityError::Empty);
            }
            if map.len() > ctx.conf.entries {
                return Err(IntegrityError::InvalidLength {
                    expected: ctx.conf.entries as u64,
                    got: map.len() as u64,
                });
            }
        }
        V::Tree(t) => {
            if t.depth != depth {
                return Err(IntegrityError::InvalidDepth {
                    expected: depth,
                    got: t.depth,
                });
            }
            let mut total = 0u64;
            for ptr in t.slots.iter().flatten() {
                let child = resolve_ptr(ctx, ptr, true).map_err(absent)?;
                total += inner_length(&child);
                check_inner(ctx, &child, depth + 1)?;
            }
            if total != t.length {
                return Err(IntegrityError::InvalidLength {
                    expected: t.length,
                    got: total,
                });
            }
        }
    }
    // The shape checks the wire form would also be subject to.
    let bin = inner_to_bin(ctx, inner).map_err(absent)?;
    check_bin(&bin, &ctx.conf)?;

    // Verify the memoised hash against a fresh computation.
    if let Some(expected) = inner.vref.known_hash() {
        let got = compute_hash(ctx, inner).map_err(absent)?;
        if got != expected {
            return Err(IntegrityError::WrongHash { expected, got });
        }
    }
    Ok(())
}

/// A directory-like map from steps to values, chunked for cheap updates.
#[derive(Clone)]
pub struct Node {
    ctx: Arc<NodeContext>,
    inner: Arc<Inner>,
}

impl Node {
    fn context(conf: TreeConfig, ordering: StepOrdering, mode: Mode) -> NodeResult<Arc<NodeContext>> {
        ordering.validate(&conf)?;
        Ok(Arc::new(NodeContext {
            conf,
            ordering,
            mode,
        }))
    }

    /// The empty root, fully in memory.
    pub fn empty(conf: TreeConfig, ordering: StepOrdering) -> NodeResult<Self> {
        let ctx = Self::context(conf, ordering, Mode::Total)?;
        Ok(Self {
            ctx,
            inner: Arc::new(Inner {
                root: true,
                v: V::Values(BTreeMap::new()),
                vref: VRef::unknown(),
            }),
        })
    }

    /// Build a root from a sequence of bindings, fully in memory.
    pub fn of_seq(
        conf: TreeConfig,
        ordering: StepOrdering,
        bindings: impl IntoIterator<Item = (Step, Value)>,
    ) -> NodeResult<Self> {
        let mut node = Self::empty(conf, ordering)?;
        for (step, value) in bindings {
            node = node.add(step, value)?;
        }
        Ok(node)
    }

    /// Load a value from the store. Children stay lazy until traversed.
    pub fn load(
        conf: TreeConfig,
        ordering: StepOrdering,
        store: Arc<dyn NodeStore>,
        key: Key,
    ) -> NodeResult<Self> {
        let ctx = Self::context(conf, ordering, Mode::Partial(Arc::clone(&store)))?;
        let bin = store
            .find_node(&key)?
            .ok_or_else(|| NodeError::DanglingHash(key.hash()))?;
        let inner = inner_of_bin(&ctx, &bin, VRef::of_key(key))?;
        Ok(Self {
            ctx,
            inner: Arc::new(inner),
        })
    }

    /// Materialise a decoded chunk with no store attached: children are
    /// broken boundaries until the index resolves them at save time.
    pub fn truncated_of_bin(
        conf: TreeConfig,
        ordering: StepOrdering,
        bin: &Bin,
    ) -> NodeResult<Self> {
        let ctx = Self::context(conf, ordering, Mode::Truncated)?;
        let inner = inner_of_bin(&ctx, bin, VRef::unknown())?;
        Ok(Self {
            ctx,
            inner: Arc::new(inner),
        })
    }

    /// The tree configuration this value was built with.
    pub fn config(&self) -> &TreeConfig {
        &self.ctx.conf
    }

    /// Whether this value is a root.
    pub fn is_root(&self) -> bool {
        self.inner.root
    }

    /// Total number of bindings. Constant time.
    pub fn length(&self) -> u64 {
        inner_length(&self.inner)
    }

    /// Number of direct children: occupied slots of an interior chunk, or
    /// the binding count of a leaf.
    pub fn nb_children(&self) -> usize {
        match &self.inner.v {
            V::Values(map) => map.len(),
            V::Tree(t) => t.slots.iter().filter(|s| s.is_some()).count(),
        }
    }

    /// Whether this value hashes as its flat map.
    pub fn is_stable(&self) -> bool {
        should_be_stable(&self.ctx.conf, self.length(), self.inner.root)
    }

    /// The value's hash, memoised after the first computation.
    pub fn hash(&self) -> NodeResult<ObjectHash> {
        inner_hash(&self.ctx, &self.inner)
    }

    /// The value's key, if it has been persisted or loaded.
    pub fn key(&self) -> Option<Key> {
        self.inner.vref.known_key()
    }

    /// Look up one step.
    pub fn find(&self, step: &Step) -> NodeResult<Option<Value>> {
        find_value(&self.ctx, &self.inner, step)
    }

    /// Bind `step` to `value`, returning the updated root.
    pub fn add(&self, step: Step, value: Value) -> NodeResult<Self> {
        if !self.inner.root {
            return Err(NodeError::WriteOnNonRoot);
        }
        if self.find(&step)? == Some(value) {
            return Ok(self.clone());
        }
        let (v, _) = add_rec(&self.ctx, &self.inner.v, 0, &step, value)?;
        Ok(self.with_root(v))
    }

    /// Remove `step`, returning the updated root.
    pub fn remove(&self, step: &Step) -> NodeResult<Self> {
        if !self.inner.root {
            return Err(NodeError::WriteOnNonRoot);
        }
        if self.find(step)?.is_none() {
            return Ok(self.clone());
        }
        let v = remove_rec(&self.ctx, &self.inner.v, step)?;
        Ok(self.with_root(v))
    }

    fn with_root(&self, v: V) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            inner: Arc::new(Inner {
                root: true,
                v,
                vref: VRef::unknown(),
            }),
        }
    }

    /// All bindings, in slot-traversal order.
    pub fn seq(&self) -> Seq {
        self.seq_within(0, None, true)
    }

    /// A window of bindings: skip `offset`, yield at most `length`.
    ///
    /// Whole subtrees shorter than the remaining offset are skipped without
    /// being enumerated. With `cache` false, children resolved during the
    /// walk are not retained.
    pub fn seq_within(&self, offset: usize, length: Option<usize>, cache: bool) -> Seq {
        Seq {
            ctx: Arc::clone(&self.ctx),
            stack: vec![SeqFrame::Inner(Arc::clone(&self.inner))],
            skip: offset,
            remaining: length,
            cache,
            failed: false,
        }
    }

    /// All bindings as a vector, in slot-traversal order.
    pub fn bindings(&self) -> NodeResult<Vec<(Step, Value)>> {
        let mut out = Vec::with_capacity(self.length() as usize);
        collect_inner(&self.ctx, &self.inner, &mut out, true)?;
        Ok(out)
    }

    /// Drop every cached lazy resolution, recursively. Dirty and owned
    /// children are untouched; broken boundaries are unaffected.
    pub fn clear(&self) {
        clear_inner(&self.inner);
    }

    /// The wire shape of the root chunk.
    pub fn to_bin(&self) -> NodeResult<Bin> {
        inner_to_bin(&self.ctx, &self.inner)
    }

    /// Walk the whole value checking structural invariants and memoised
    /// hashes. Resolution failures surface as [`IntegrityError::AbsentValue`].
    pub fn integrity_check(&self) -> Result<(), IntegrityError> {
        check_inner(&self.ctx, &self.inner, 0)
    }

    /// Persist the value bottom-up and return the root key.
    ///
    /// Every dirty child is saved first; already-persisted subtrees are
    /// reused through the index. With `clear` true, saved children downgrade
    /// to lazy keys instead of staying cached. After a successful save,
    /// every pointer in the tree is a key.
    pub fn save(&self, store: &dyn NodeStore, clear: bool) -> NodeResult<Key> {
        save_inner(&self.ctx, &self.inner, store, clear)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("root", &self.inner.root)
            .field("length", &self.length())
            .field("stable", &self.is_stable())
            .finish()
    }
}

/// Lazy binding iterator. Yields `Err` once and fuses on failure.
pub struct Seq {
    ctx: Arc<NodeContext>,
    stack: Vec<SeqFrame>,
    skip: usize,
    remaining: Option<usize>,
    cache: bool,
    failed: bool,
}

enum SeqFrame {
    Inner(Arc<Inner>),
    Ptr(Arc<Ptr>),
    Bindings(std::vec::IntoIter<(Step, Value)>),
}

impl Iterator for Seq {
    type Item = NodeResult<(Step, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == Some(0) {
            return None;
        }
        loop {
            let frame = self.stack.pop()?;
            match frame {
                SeqFrame::Bindings(mut iter) => {
                    if let Some(binding) = iter.next() {
                        self.stack.push(SeqFrame::Bindings(iter));
                        if self.skip > 0 {
                            self.skip -= 1;
                            continue;
                        }
                        if let Some(r) = self.remaining.as_mut() {
                            *r -= 1;
                        }
                        return Some(Ok(binding));
                    }
                }
                SeqFrame::Ptr(ptr) => match resolve_ptr(&self.ctx, &ptr, self.cache) {
                    Ok(child) => self.stack.push(SeqFrame::Inner(child)),
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                },
                SeqFrame::Inner(inner) => {
                    let length = inner_length(&inner) as usize;
                    if self.skip >= length {
                        self.skip -= length;
                        continue;
                    }
                    match &inner.v {
                        V::Values(map) => {
                            let bindings: Vec<(Step, Value)> =
                                map.iter().map(|(s, v)| (s.clone(), *v)).collect();
                            self.stack.push(SeqFrame::Bindings(bindings.into_iter()));
                        }
                        V::Tree(t) => {
                            for ptr in t.slots.iter().rev().flatten() {
                                self.stack.push(SeqFrame::Ptr(Arc::clone(ptr)));
                            }
                        }
                    }
                }
            }
        }
    }
}
