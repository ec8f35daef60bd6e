use proptest::prelude::*;

/// What the push collaborator reports next
#[derive(Debug, Clone)]
pub enum PushSignal {
    Message(String),
    Failure,
}

/// Strategy for provider message ids, small enough to collide often
pub fn message_id_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..50).prop_map(|n| format!("wamid.{n}")),
        "[a-z]{1,3}",
    ]
}

/// Strategy for interleaved push messages and failures
pub fn push_signal_strategy() -> impl Strategy<Value = PushSignal> {
    prop_oneof![
        1 => message_id_strategy().prop_map(PushSignal::Message),
        2 => Just(PushSignal::Failure),
    ]
}

pub fn push_signals_strategy(max_len: usize) -> impl Strategy<Value = Vec<PushSignal>> {
    prop::collection::vec(push_signal_strategy(), 0..max_len)
}

/// Strategy for queue traffic: (message id, consume after enqueue)
pub fn queue_traffic_strategy(max_len: usize) -> impl Strategy<Value = Vec<(String, bool)>> {
    prop::collection::vec((message_id_strategy(), any::<bool>()), 0..max_len)
}
