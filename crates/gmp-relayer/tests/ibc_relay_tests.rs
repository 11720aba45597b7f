// Integration tests for packet relay over a mock IBC channel
mod common;

use common::{channel_config, endpoint_pair};
use gmp_relayer::config::ChannelOrdering;
use gmp_relayer::relay::{Direction, IbcRelayer, Relayer};

#[tokio::test]
async fn test_setup_reuses_open_channel() {
    let (a, b) = endpoint_pair(ChannelOrdering::Unordered, true);
    let mut relayer = IbcRelayer::new(channel_config(ChannelOrdering::Unordered), a.clone(), b.clone());

    let first = relayer.setup().await.unwrap();
    let second = relayer.setup().await.unwrap();

    assert_eq!(first, ("channel-0".to_string(), "channel-7".to_string()));
    assert_eq!(first, second);
    assert_eq!(a.open_calls(), 0);
    assert_eq!(b.open_calls(), 0);
    assert!(relayer.state().is_established());
}

#[tokio::test]
async fn test_setup_prefers_newest_open_channel() {
    let (a, b) = endpoint_pair(ChannelOrdering::Unordered, true);
    a.add_channel("channel-3", "channel-9");
    b.add_channel("channel-9", "channel-3");
    // Half-matched end is ignored
    a.add_channel("channel-12", "channel-40");
    let mut relayer = IbcRelayer::new(channel_config(ChannelOrdering::Unordered), a.clone(), b.clone());

    let pair = relayer.setup().await.unwrap();
    assert_eq!(pair, ("channel-3".to_string(), "channel-9".to_string()));
    assert_eq!(a.open_calls(), 0);
}

#[tokio::test]
async fn test_setup_opens_channel_only_once() {
    let (a, b) = endpoint_pair(ChannelOrdering::Ordered, false);
    let mut relayer = IbcRelayer::new(channel_config(ChannelOrdering::Ordered), a.clone(), b.clone());

    let first = relayer.setup().await.unwrap();
    let second = relayer.setup().await.unwrap();

    assert_eq!(first, ("channel-0".to_string(), "channel-7".to_string()));
    assert_eq!(first, second);
    assert_eq!(a.open_calls(), 1);
}

#[tokio::test]
async fn test_ordered_relay_reports_receive_then_ack_heights() {
    let (a, b) = endpoint_pair(ChannelOrdering::Ordered, true);
    a.send(&[1, 2, 3]);
    b.send(&[1]);
    let mut relayer = IbcRelayer::new(channel_config(ChannelOrdering::Ordered), a.clone(), b.clone());

    // relay() sets the link up on first use
    let result = relayer.relay().await.unwrap();

    // Receives on axelar, receive on wasm, acks on wasm, ack on axelar
    assert_eq!(result.heights, vec![201, 202, 203, 101, 102, 103, 104, 204]);
    assert_eq!(b.recv_order(), vec![1, 2, 3]);
    assert_eq!(a.recv_order(), vec![1]);
    assert!(a.outstanding().is_empty());
    assert!(b.outstanding().is_empty());
    assert_eq!(relayer.state().last_relayed(Direction::AToB), 3);
    assert_eq!(relayer.state().last_relayed(Direction::BToA), 1);

    let again = relayer.relay().await.unwrap();
    assert!(again.heights.is_empty());
}

#[tokio::test]
async fn test_ordered_gap_aborts_direction_without_advancing() {
    let (a, b) = endpoint_pair(ChannelOrdering::Ordered, true);
    a.send(&[1, 3]);
    let mut relayer = IbcRelayer::new(channel_config(ChannelOrdering::Ordered), a.clone(), b.clone());

    let result = relayer.relay().await.unwrap();
    assert!(result.heights.is_empty());
    assert!(b.recv_order().is_empty());
    assert_eq!(relayer.state().last_relayed(Direction::AToB), 0);

    // Filling the gap lets the next cycle relay from the same point
    a.send(&[2]);
    let result = relayer.relay().await.unwrap();
    assert_eq!(b.recv_order(), vec![1, 2, 3]);
    assert_eq!(result.heights.len(), 6);
    assert_eq!(relayer.state().last_relayed(Direction::AToB), 3);
}

#[tokio::test]
async fn test_unordered_failure_only_holds_back_the_watermark() {
    let (a, b) = endpoint_pair(ChannelOrdering::Unordered, true);
    a.send(&[1, 2, 3, 4]);
    b.fail_recv(2);
    let mut relayer = IbcRelayer::new(channel_config(ChannelOrdering::Unordered), a.clone(), b.clone());

    let result = relayer.relay().await.unwrap();
    let mut received = b.recv_order();
    received.sort_unstable();
    assert_eq!(received, vec![1, 3, 4]);
    // Three receives and three acks
    assert_eq!(result.heights.len(), 6);
    assert_eq!(relayer.state().last_relayed(Direction::AToB), 1);
    assert_eq!(a.outstanding(), vec![2]);

    b.heal_recv(2);
    let result = relayer.relay().await.unwrap();
    assert_eq!(result.heights.len(), 2);
    assert!(a.outstanding().is_empty());
    assert_eq!(relayer.state().last_relayed(Direction::AToB), 2);
}

#[tokio::test]
async fn test_failed_ack_does_not_drop_the_rest_of_the_batch() {
    let (a, b) = endpoint_pair(ChannelOrdering::Unordered, true);
    a.send(&[1, 2, 3]);
    a.fail_ack(2);
    let mut relayer = IbcRelayer::new(channel_config(ChannelOrdering::Unordered), a.clone(), b.clone());

    let result = relayer.relay().await.unwrap();
    // Three receives on axelar, then acks for 1 and 3 on wasm
    assert_eq!(result.heights.len(), 5);
    assert_eq!(&result.heights[3..], &[101, 102]);
    assert_eq!(a.outstanding(), vec![2]);
    assert_eq!(relayer.state().last_relayed(Direction::AToB), 3);

    a.heal_ack(2);
    let result = relayer.relay().await.unwrap();
    assert_eq!(result.heights, vec![103]);
    assert!(a.outstanding().is_empty());
}

#[tokio::test]
async fn test_relay_cycle_exposes_heights_as_relay_data() {
    let (a, b) = endpoint_pair(ChannelOrdering::Unordered, true);
    b.send(&[1]);
    let mut relayer = IbcRelayer::new(channel_config(ChannelOrdering::Unordered), a.clone(), b.clone());

    let data = relayer.relay_cycle().await.unwrap();
    assert_eq!(data.heights, vec![101, 201]);
    assert!(data.outcomes.is_empty());
    assert_eq!(relayer.relay_data(), &data);
    assert_eq!(relayer.link_id(), "wasm-axelar");
}
