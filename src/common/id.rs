//! Kademlia node Id, public-key fingerprint, or a lookup target
use rand::Rng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha1_smol::Sha1;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
pub const MAX_DISTANCE: u8 = ID_SIZE as u8 * 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
/// Kademlia node Id or a lookup target
pub struct Id([u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id, InvalidIdSize> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp[..ID_SIZE].clone_from_slice(&bytes[..ID_SIZE]);

        Ok(Id(tmp))
    }

    /// SHA-1 of arbitrary bytes, used to turn storage keys into lookup targets.
    pub fn hash<T: AsRef<[u8]>>(bytes: T) -> Id {
        Id(Sha1::from(bytes.as_ref()).digest().bytes())
    }

    /// Fingerprint of an ed25519 public key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Id {
        Id::hash(public_key)
    }

    /// Parse a control-plane key: a 40 character hex string is taken as an Id,
    /// anything else is hashed.
    pub fn from_key(key: &str) -> Id {
        key.parse().unwrap_or_else(|_| Id::hash(key.as_bytes()))
    }

    /// Simplified XOR distance between this Id and a target Id.
    ///
    /// The distance is the number of trailing non zero bits in the XOR result.
    ///
    /// Distance to self is 0
    /// Distance to the furthest Id is 160
    /// Distance to an Id with 5 leading matching bits is 155
    pub fn distance(&self, other: &Id) -> u8 {
        for i in 0..ID_SIZE {
            let a = self.0[i];
            let b = other.0[i];

            if a != b {
                // leading zeros so far + leading zeros of this byte
                let leading_zeros = (i as u32 * 8 + (a ^ b).leading_zeros()) as u8;

                return MAX_DISTANCE - leading_zeros;
            }
        }

        0
    }

    /// Full XOR metric, for ordering ids at the same [Self::distance].
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Id(result)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Id {
        Id(bytes)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = InvalidIdSize;

    fn from_str(s: &str) -> Result<Id, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| InvalidIdSize(s.len() / 2))?;

        Id::from_bytes(bytes)
    }
}

// Ids travel as hex strings both in `config.json` and on the wire, which keeps
// the bencode and json encodings symmetric.
impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Id, D::Error> {
        struct IdVisitor;

        impl de::Visitor<'_> for IdVisitor {
            type Value = Id;

            fn expecting(&self, f: &mut Formatter) -> fmt::Result {
                f.write_str("a 40 character hex string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Id, E> {
                // Only the canonical lowercase form, so an encoded Id has
                // exactly one valid spelling.
                if v.bytes().any(|b| b.is_ascii_uppercase()) {
                    return Err(E::custom("uppercase hex in Id"));
                }

                v.parse().map_err(E::custom)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Id, E> {
                let s = std::str::from_utf8(v).map_err(E::custom)?;
                self.visit_str(s)
            }
        }

        deserializer.deserialize_str(IdVisitor)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid Id size, expected {ID_SIZE} bytes, got {0}")]
pub struct InvalidIdSize(pub usize);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distance_to_self() {
        let id = Id::random();
        let distance = id.distance(&id);
        assert_eq!(distance, 0)
    }

    #[test]
    fn distance_to_id() {
        let id = Id::from_str("0639A1E24FBB8AB277DF033476AB0DE10FAB3BDC").unwrap();

        let target = Id::from_str("035b1aeb9737ade1a80933594f405d3f772aa08e").unwrap();

        let distance = id.distance(&target);

        assert_eq!(distance, 155)
    }

    #[test]
    fn distance_to_random_id() {
        let id = Id::random();
        let target = Id::random();

        let distance = id.distance(&target);

        assert_ne!(distance, 0)
    }

    #[test]
    fn distance_to_furthest() {
        let id = Id::random();

        let mut opposite = [0_u8; 20];
        for (i, &value) in id.as_bytes().iter().enumerate() {
            opposite[i] = value ^ 0xff;
        }
        let target = Id::from(opposite);

        let distance = id.distance(&target);

        assert_eq!(distance, MAX_DISTANCE)
    }

    #[test]
    fn from_key_accepts_hex_ids() {
        let id = Id::random();

        assert_eq!(Id::from_key(&id.to_string()), id);
        assert_eq!(Id::from_key("k"), Id::hash(b"k"));
    }

    #[test]
    fn json_roundtrip_is_hex() {
        let id = Id::random();
        let json = serde_json::to_string(&id).unwrap();

        assert_eq!(json, format!("\"{}\"", id));
        assert_eq!(serde_json::from_str::<Id>(&json).unwrap(), id);

        let uppercase = json.to_uppercase();
        assert!(serde_json::from_str::<Id>(&uppercase).is_err());
    }

    #[test]
    fn rejects_wrong_size() {
        assert_eq!(Id::from_bytes([0; 19]), Err(InvalidIdSize(19)));
        assert!(Id::from_str("abcd").is_err());
    }
}
