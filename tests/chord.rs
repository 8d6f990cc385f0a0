mod common;

use chord_ring::{ChordNode, Identifier, SimNetwork};

#[tokio::test(start_paused = true)]
async fn two_node_ring_converges_to_mutual_neighbours() {
	let network = SimNetwork::new();
	let handles = common::make_nodes(&network, 2).await;
	common::settle(30).await;

	let a = common::ring_id_of(1);
	let b = common::ring_id_of(2);

	let (a_pred, a_succ) = handles[0].neighbours().await.unwrap();
	let (b_pred, b_succ) = handles[1].neighbours().await.unwrap();

	assert_eq!(a_succ, b, "first node's successor must be the joiner");
	assert_eq!(a_pred, Some(b), "first node's predecessor must be the joiner");
	assert_eq!(b_succ, a, "joiner's successor must be the first node");
	assert_eq!(b_pred, Some(a), "joiner's predecessor must be the first node");
}

#[tokio::test(start_paused = true)]
async fn six_node_ring_matches_identifier_order() {
	let network = SimNetwork::new();
	let handles = common::make_nodes(&network, 6).await;
	common::settle(120).await;

	// the converged ring must follow the sorted order of the six
	// digest-derived identifiers
	let mut ring: Vec<Identifier> = (1..=6).map(common::ring_id_of).collect();
	ring.sort();

	for (i, handle) in handles.iter().enumerate() {
		let own = common::ring_id_of(i as u32 + 1);
		let position = ring.iter().position(|id| *id == own).unwrap();
		let expected_succ = ring[(position + 1) % ring.len()];
		let expected_pred = ring[(position + ring.len() - 1) % ring.len()];

		let (pred, succ) = handle.neighbours().await.unwrap();
		assert_eq!(succ, expected_succ, "wrong successor for node {}", own);
		assert_eq!(pred, Some(expected_pred), "wrong predecessor for node {}", own);
	}
}

#[tokio::test(start_paused = true)]
async fn lookups_resolve_to_the_owning_node() {
	let network = SimNetwork::new();
	let handles = common::make_nodes(&network, 6).await;
	common::settle(120).await;

	let mut ring: Vec<Identifier> = (1..=6).map(common::ring_id_of).collect();
	ring.sort();

	// the owner of a key is the first node at or clockwise of it
	let owner_of = |key: &Identifier| -> Identifier {
		*ring.iter().find(|id| *id >= key).unwrap_or(&ring[0])
	};

	for key_source in ["alpha", "beta", "gamma", "delta"] {
		let key = Identifier::hash(key_source.as_bytes());
		let expected = owner_of(&key);
		for handle in &handles {
			let (found, _addr) = handle.lookup(key).await.unwrap();
			assert_eq!(found, expected, "lookup of {key} from some node disagreed");
		}
	}
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_processor() {
	let network = SimNetwork::new();
	let ip = common::addr_of(1);
	let config = common::test_config(ip);
	let transport = network.endpoint(ip, config.port);
	let (handle, task) = ChordNode::new(config, transport).start(None);

	common::settle(2).await;
	handle.shutdown().await;
	task.await.unwrap();

	let key = Identifier::hash(b"anything");
	assert!(handle.lookup(key).await.is_err());
}
