/// Execute an aggregate command deterministically (no IO, no async).
///
/// The canonical event-sourced lifecycle in one step:
///
/// 1. **Decide**: `aggregate.handle(command)` produces events (pure).
/// 2. **Evolve**: each event is applied via `aggregate.apply(event)`.
///
/// This mutates the aggregate in place. For the persisted pipeline (append
/// with optimistic concurrency + publish), use the orchestrator's order store.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: swiftmart_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
