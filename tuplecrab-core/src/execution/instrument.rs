use super::*;

/// Tuple count of one instrumented output port.
#[derive(Debug, Clone)]
pub struct PortCount {
    pub vertex: VertexId,
    pub port: usize,
    pub count: TupleCount,
}

/// Splice a counter after every connected output port of `graph`.
pub fn instrument_counters(graph: &mut Graph) -> Result<Vec<PortCount>, GraphError> {
    let mut counts = Vec::new();
    for vertex in graph.vertices().iter() {
        if vertex.kind() == OpletKind::Peek {
            continue;
        }
        for port in 0..vertex.output_count() {
            if !vertex.is_output_connected(port) {
                continue;
            }
            let count = TupleCount::default();
            graph.splice(
                vertex.id(),
                port,
                OpletKind::Peek,
                Box::new(ErasedCounter::new(count.clone())),
            )?;
            counts.push(PortCount {
                vertex: vertex.id(),
                port,
                count,
            });
        }
    }
    Ok(counts)
}
