/// Decide and apply a command against an in-memory aggregate.
///
/// No persistence and no publication: this is the aggregate lifecycle on its
/// own, handy in unit tests and for previewing what a command would do. The
/// order store runs the same two steps around its append.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: autoshop_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
