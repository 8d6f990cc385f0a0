use std::cmp::Ordering;
use std::fmt;
use std::net::Ipv4Addr;

use num_bigint::{BigUint, RandBigInt};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Width of the identifier space in bits.
pub const ID_BITS: u32 = 160;

/// Width of the identifier space in bytes; also the wire size of an id.
pub const ID_BYTES: usize = 20;

/// A point on the chord ring: a 160-bit unsigned value with wrapping
/// arithmetic mod 2^160. The canonical form is 20 big-endian bytes, which
/// is also the wire representation, so ordering is plain byte ordering
/// and never depends on host endianness.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier([u8; ID_BYTES]);

impl Identifier {
	/// The identifier of value zero.
	pub fn zero() -> Self {
		Identifier([0; ID_BYTES])
	}

	pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
		Identifier(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
		&self.0
	}

	/// Digest arbitrary bytes into the identifier space.
	pub fn hash(data: &[u8]) -> Self {
		let mut hasher = Sha1::new();
		hasher.update(data);
		let digest = hasher.finalize();
		let mut id = [0u8; ID_BYTES];
		id.copy_from_slice(&digest);
		Identifier(id)
	}

	/// A node's position on the ring is the digest of its dotted-quad
	/// address string.
	pub fn from_address(addr: &Ipv4Addr) -> Self {
		Self::hash(addr.to_string().as_bytes())
	}

	/// A uniformly random point on the ring.
	pub fn random() -> Self {
		let mut rng = rand::thread_rng();
		Self::from_biguint(rng.gen_biguint(ID_BITS as u64))
	}

	/// Addition mod 2^160. The sum is carried limb by limb from the least
	/// significant end, so the result is identical on every host.
	pub fn wrapping_add(&self, other: &Identifier) -> Identifier {
		let sum = self.to_biguint() + other.to_biguint();
		Self::from_biguint(sum)
	}

	/// 2^power mod 2^160, defined for power in [0, 160]. At 160 the value
	/// wraps to zero, which is what finger interval ends rely on.
	pub fn power_of_two(power: u32) -> Identifier {
		debug_assert!(power <= ID_BITS);
		Self::from_biguint(BigUint::from(1u32) << power)
	}

	fn to_biguint(&self) -> BigUint {
		BigUint::from_bytes_be(&self.0)
	}

	fn from_biguint(value: BigUint) -> Identifier {
		let reduced = value % (BigUint::from(2u32).pow(ID_BITS));
		let bytes = reduced.to_bytes_be();
		let mut id = [0u8; ID_BYTES];
		id[ID_BYTES - bytes.len()..].copy_from_slice(&bytes);
		Identifier(id)
	}

	/// Membership in the closed arc [begin, end]. When begin == end the
	/// arc is the full circle.
	pub fn in_closed(&self, begin: &Identifier, end: &Identifier) -> bool {
		match begin.cmp(end) {
			Ordering::Less => self >= begin && self <= end,
			Ordering::Equal => true,
			Ordering::Greater => self >= begin || self <= end,
		}
	}

	/// Membership in the open arc (begin, end). When begin == end the arc
	/// is the full circle minus the endpoint itself.
	pub fn in_open(&self, begin: &Identifier, end: &Identifier) -> bool {
		match begin.cmp(end) {
			Ordering::Less => self > begin && self < end,
			Ordering::Equal => self != begin,
			Ordering::Greater => self > begin || self < end,
		}
	}

	/// Membership in the left-open arc (begin, end]. This is the
	/// successor-match test. When begin == end the arc is the full circle.
	pub fn in_left_open(&self, begin: &Identifier, end: &Identifier) -> bool {
		match begin.cmp(end) {
			Ordering::Less => self > begin && self <= end,
			Ordering::Equal => true,
			Ordering::Greater => self > begin || self <= end,
		}
	}

	/// Membership in the right-open arc [begin, end), the shape of a
	/// finger interval. When begin == end the arc is the full circle.
	pub fn in_right_open(&self, begin: &Identifier, end: &Identifier) -> bool {
		match begin.cmp(end) {
			Ordering::Less => self >= begin && self < end,
			Ordering::Equal => true,
			Ordering::Greater => self >= begin || self < end,
		}
	}
}

impl fmt::Debug for Identifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Identifier({})", hex::encode(&self.0[..8]))
	}
}

impl fmt::Display for Identifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(&self.0[..8]))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn id(n: u32) -> Identifier {
		let mut bytes = [0u8; ID_BYTES];
		bytes[ID_BYTES - 4..].copy_from_slice(&n.to_be_bytes());
		Identifier::from_bytes(bytes)
	}

	#[test]
	fn addition_identity() {
		for value in [id(0), id(1), id(0xFFFF_FFFF), Identifier::random()] {
			assert_eq!(value.wrapping_add(&Identifier::zero()), value);
		}
	}

	#[test]
	fn addition_commutes_and_associates() {
		let (a, b, c) = (Identifier::random(), Identifier::random(), Identifier::random());
		assert_eq!(a.wrapping_add(&b), b.wrapping_add(&a));
		assert_eq!(
			a.wrapping_add(&b).wrapping_add(&c),
			a.wrapping_add(&b.wrapping_add(&c))
		);
	}

	#[test]
	fn addition_wraps_at_modulus() {
		let max = Identifier::from_bytes([0xFF; ID_BYTES]);
		assert_eq!(max.wrapping_add(&id(1)), Identifier::zero());
		assert_eq!(max.wrapping_add(&id(2)), id(1));
	}

	#[test]
	fn power_of_two_values() {
		assert_eq!(Identifier::power_of_two(0), id(1));
		assert_eq!(Identifier::power_of_two(1), id(2));
		assert_eq!(Identifier::power_of_two(31), id(0x8000_0000));

		let mut msb = [0u8; ID_BYTES];
		msb[0] = 0x80;
		assert_eq!(Identifier::power_of_two(159), Identifier::from_bytes(msb));

		// 2^160 wraps to zero
		assert_eq!(Identifier::power_of_two(160), Identifier::zero());
	}

	#[test]
	fn ordering_is_numeric() {
		assert!(id(1) < id(2));
		assert!(id(0x0100) > id(0xFF));
		let mut high = [0u8; ID_BYTES];
		high[0] = 1;
		assert!(Identifier::from_bytes(high) > id(u32::MAX));
	}

	#[test]
	fn open_interval_with_equal_bounds_is_full_circle() {
		let a = id(500);
		for value in [id(0), id(499), id(501), Identifier::random()] {
			if value != a {
				assert!(value.in_open(&a, &a));
			}
		}
		assert!(!a.in_open(&a, &a));
	}

	#[test]
	fn left_open_interval_with_equal_bounds_contains_everything() {
		let a = id(500);
		assert!(a.in_left_open(&a, &a));
		assert!(id(7).in_left_open(&a, &a));
	}

	#[test]
	fn intervals_without_wrap() {
		let (lo, hi) = (id(10), id(20));
		assert!(id(15).in_open(&lo, &hi));
		assert!(!id(10).in_open(&lo, &hi));
		assert!(!id(20).in_open(&lo, &hi));
		assert!(id(20).in_left_open(&lo, &hi));
		assert!(!id(10).in_left_open(&lo, &hi));
		assert!(id(10).in_right_open(&lo, &hi));
		assert!(!id(20).in_right_open(&lo, &hi));
		assert!(id(10).in_closed(&lo, &hi));
		assert!(id(20).in_closed(&lo, &hi));
		assert!(!id(25).in_closed(&lo, &hi));
	}

	#[test]
	fn intervals_across_the_wrap_point() {
		// arc from near the top of the ring, across zero, to 10
		let begin = Identifier::from_bytes([0xFF; ID_BYTES]);
		let end = id(10);
		assert!(id(5).in_open(&begin, &end));
		assert!(Identifier::zero().in_open(&begin, &end));
		assert!(!id(10).in_open(&begin, &end));
		assert!(id(10).in_left_open(&begin, &end));
		assert!(!id(11).in_left_open(&begin, &end));
		assert!(!begin.in_open(&begin, &end));
		assert!(begin.in_closed(&begin, &end));
	}

	#[test]
	fn address_hash_is_stable() {
		let addr: Ipv4Addr = "10.0.0.1".parse().unwrap();
		assert_eq!(Identifier::from_address(&addr), Identifier::from_address(&addr));
		assert_eq!(
			Identifier::from_address(&addr),
			Identifier::hash(b"10.0.0.1")
		);
	}
}
