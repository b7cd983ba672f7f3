//! In-memory WAF with real change-token semantics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::error::ApiError;
use crate::waf::{
    ChangeAction, ChangeToken, ChangeTokenStatus, Rule, RuleUpdate, SizeConstraintSet,
    SizeConstraintUpdate, TokenScope, WafApi,
};

const STALE: &str = "WAFStaleDataException";
const NONEXISTENT: &str = "WAFNonexistentItemException";
const NON_EMPTY: &str = "WAFNonEmptyEntityException";
const INVALID_OPERATION: &str = "WAFInvalidOperationException";

#[derive(Debug, Default)]
struct TokenRecord {
    used: bool,
    polls: u32,
}

#[derive(Debug, Default)]
struct State {
    next_token: u64,
    next_id: u64,
    /// The token handed out until someone consumes it.
    current: Option<ChangeToken>,
    tokens: HashMap<ChangeToken, TokenRecord>,
    sets: BTreeMap<String, SizeConstraintSet>,
    rules: BTreeMap<String, Rule>,
    failures: HashMap<&'static str, VecDeque<ApiError>>,
}

impl State {
    fn take_failure(&mut self, op: &str) -> Result<(), ApiError> {
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Check and consume `token`, failing with a stale-data error if it
    /// is not the current one.
    fn consume(&mut self, token: &ChangeToken) -> Result<(), ApiError> {
        if self.current.as_ref() != Some(token) {
            return Err(ApiError::token_conflict());
        }
        self.current = None;
        if let Some(record) = self.tokens.get_mut(token) {
            record.used = true;
        }
        Ok(())
    }

    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:08x}-0000-4000-8000-{:012x}", self.next_id, self.next_id)
    }
}

/// Fake WAF endpoint.
///
/// `get_change_token` returns the same token until a mutation consumes it;
/// a mutation carrying any other token fails with `WAFStaleDataException`.
/// Used tokens report `PENDING` for a configurable number of status polls
/// and then `INSYNC`.
#[derive(Debug, Default)]
pub struct FakeWaf {
    scope: TokenScope,
    state: Mutex<State>,
    token_fetches: AtomicU32,
    status_polls: AtomicU32,
    sync_delay: AtomicU32,
}

impl FakeWaf {
    /// An empty WAF whose tokens sync immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty WAF Regional endpoint for `region`.
    pub fn regional(region: impl Into<String>) -> Self {
        Self {
            scope: TokenScope::Regional(region.into()),
            ..Self::default()
        }
    }

    /// Make the next call to `op` (e.g. `CreateRule`) fail with `err`.
    ///
    /// Failures queue up per operation and fire before token checks.
    pub fn inject_failure(&self, op: &'static str, err: ApiError) {
        lock(&self.state).failures.entry(op).or_default().push_back(err);
    }

    /// Number of status polls a used token stays `PENDING` for.
    pub fn set_sync_delay(&self, polls: u32) {
        self.sync_delay.store(polls, Ordering::SeqCst);
    }

    /// Calls to `GetChangeToken`, including failed ones.
    pub fn token_fetches(&self) -> u32 {
        self.token_fetches.load(Ordering::SeqCst)
    }

    /// Calls to `GetChangeTokenStatus`.
    pub fn status_polls(&self) -> u32 {
        self.status_polls.load(Ordering::SeqCst)
    }

    /// Tokens issued and never used.
    pub fn outstanding_tokens(&self) -> usize {
        lock(&self.state).tokens.values().filter(|t| !t.used).count()
    }

    /// A size constraint set as stored.
    pub fn size_constraint_set(&self, id: &str) -> Option<SizeConstraintSet> {
        lock(&self.state).sets.get(id).cloned()
    }

    /// Drop a size constraint set without a token, as another tool would.
    pub fn remove_size_constraint_set(&self, id: &str) {
        lock(&self.state).sets.remove(id);
    }

    /// A rule as stored.
    pub fn rule(&self, id: &str) -> Option<Rule> {
        lock(&self.state).rules.get(id).cloned()
    }

    /// Number of size constraint sets that exist.
    pub fn size_constraint_set_count(&self) -> usize {
        lock(&self.state).sets.len()
    }

    /// Number of rules that exist.
    pub fn rule_count(&self) -> usize {
        lock(&self.state).rules.len()
    }
}

/// Apply insert/delete updates to a list, all or nothing.
fn apply<T: PartialEq + Clone>(
    items: &[T],
    updates: impl IntoIterator<Item = (ChangeAction, T)>,
) -> Result<Vec<T>, ApiError> {
    let mut next = items.to_vec();
    for (action, item) in updates {
        match action {
            ChangeAction::Insert => {
                if next.contains(&item) {
                    return Err(ApiError::new(INVALID_OPERATION, "The element already exists"));
                }
                next.push(item);
            },
            ChangeAction::Delete => match next.iter().position(|i| *i == item) {
                Some(pos) => {
                    next.remove(pos);
                },
                None => return Err(ApiError::not_found(NONEXISTENT, "The element")),
            },
        }
    }
    Ok(next)
}

#[async_trait]
impl WafApi for FakeWaf {
    fn scope(&self) -> TokenScope {
        self.scope.clone()
    }

    async fn get_change_token(&self) -> Result<ChangeToken, ApiError> {
        self.token_fetches.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        state.take_failure("GetChangeToken")?;

        if let Some(token) = &state.current {
            return Ok(token.clone());
        }
        state.next_token += 1;
        let token = ChangeToken::new(format!("token-{:04}", state.next_token));
        state.tokens.insert(token.clone(), TokenRecord::default());
        state.current = Some(token.clone());
        Ok(token)
    }

    async fn get_change_token_status(
        &self,
        token: &ChangeToken,
    ) -> Result<ChangeTokenStatus, ApiError> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        let delay = self.sync_delay.load(Ordering::SeqCst);
        let mut state = lock(&self.state);
        state.take_failure("GetChangeTokenStatus")?;

        let record = state
            .tokens
            .get_mut(token)
            .ok_or_else(|| ApiError::not_found(NONEXISTENT, format!("Change token {}", token)))?;
        if !record.used {
            return Ok(ChangeTokenStatus::Provisioned);
        }
        record.polls = record.polls.saturating_add(1);
        if record.polls > delay {
            Ok(ChangeTokenStatus::InSync)
        } else {
            Ok(ChangeTokenStatus::Pending)
        }
    }

    async fn create_size_constraint_set(
        &self,
        token: &ChangeToken,
        name: &str,
    ) -> Result<SizeConstraintSet, ApiError> {
        let mut state = lock(&self.state);
        state.take_failure("CreateSizeConstraintSet")?;
        state.consume(token)?;
        let set = SizeConstraintSet {
            id: state.new_id(),
            name: name.to_string(),
            size_constraints: Vec::new(),
        };
        state.sets.insert(set.id.clone(), set.clone());
        Ok(set)
    }

    async fn get_size_constraint_set(&self, id: &str) -> Result<SizeConstraintSet, ApiError> {
        let mut state = lock(&self.state);
        state.take_failure("GetSizeConstraintSet")?;
        state
            .sets
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(NONEXISTENT, format!("SizeConstraintSet {}", id)))
    }

    async fn update_size_constraint_set(
        &self,
        token: &ChangeToken,
        id: &str,
        updates: &[SizeConstraintUpdate],
    ) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        state.take_failure("UpdateSizeConstraintSet")?;
        let current = state
            .sets
            .get(id)
            .ok_or_else(|| ApiError::not_found(NONEXISTENT, format!("SizeConstraintSet {}", id)))?
            .size_constraints
            .clone();
        let next = apply(
            &current,
            updates.iter().map(|u| (u.action, u.constraint.clone())),
        )?;
        state.consume(token)?;
        if let Some(set) = state.sets.get_mut(id) {
            set.size_constraints = next;
        }
        Ok(())
    }

    async fn delete_size_constraint_set(
        &self,
        token: &ChangeToken,
        id: &str,
    ) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        state.take_failure("DeleteSizeConstraintSet")?;
        match state.sets.get(id).map(|set| set.size_constraints.is_empty()) {
            None => Err(ApiError::not_found(NONEXISTENT, format!("SizeConstraintSet {}", id))),
            Some(false) => Err(ApiError::new(
                NON_EMPTY,
                "The SizeConstraintSet still contains constraints",
            )),
            Some(true) => {
                state.consume(token)?;
                state.sets.remove(id);
                Ok(())
            },
        }
    }

    async fn create_rule(
        &self,
        token: &ChangeToken,
        name: &str,
        metric_name: &str,
    ) -> Result<Rule, ApiError> {
        let mut state = lock(&self.state);
        state.take_failure("CreateRule")?;
        state.consume(token)?;
        let rule = Rule {
            id: state.new_id(),
            name: name.to_string(),
            metric_name: metric_name.to_string(),
            predicates: Vec::new(),
        };
        state.rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    async fn get_rule(&self, id: &str) -> Result<Rule, ApiError> {
        let mut state = lock(&self.state);
        state.take_failure("GetRule")?;
        state
            .rules
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(NONEXISTENT, format!("Rule {}", id)))
    }

    async fn update_rule(
        &self,
        token: &ChangeToken,
        id: &str,
        updates: &[RuleUpdate],
    ) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        state.take_failure("UpdateRule")?;
        let current = state
            .rules
            .get(id)
            .ok_or_else(|| ApiError::not_found(NONEXISTENT, format!("Rule {}", id)))?
            .predicates
            .clone();
        let next = apply(&current, updates.iter().map(|u| (u.action, u.predicate.clone())))?;
        state.consume(token)?;
        if let Some(rule) = state.rules.get_mut(id) {
            rule.predicates = next;
        }
        Ok(())
    }

    async fn delete_rule(&self, token: &ChangeToken, id: &str) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        state.take_failure("DeleteRule")?;
        match state.rules.get(id).map(|rule| rule.predicates.is_empty()) {
            None => Err(ApiError::not_found(NONEXISTENT, format!("Rule {}", id))),
            Some(false) => Err(ApiError::new(NON_EMPTY, "The Rule still contains predicates")),
            Some(true) => {
                state.consume(token)?;
                state.rules.remove(id);
                Ok(())
            },
        }
    }
}
