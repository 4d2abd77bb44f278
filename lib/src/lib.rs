#![no_std]

pub mod address;
pub mod constant;
pub mod errors;
pub mod guard;
pub mod interfaces;
pub mod typed_data;
pub mod types;

pub use constant::*;
pub use errors::ContractError;
pub use types::*;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    use crate::types::SignerProof;
    use ed25519_dalek::{Signer, SigningKey};
    use soroban_sdk::{testutils::Address as _, Address, BytesN, Env};

    /// An account with an ed25519 key, for producing real signatures in tests.
    pub struct TestSigner {
        pub address: Address,
        key: SigningKey,
    }

    impl TestSigner {
        pub fn new(env: &Env, seed: u8) -> Self {
            TestSigner {
                address: Address::generate(env),
                key: SigningKey::from_bytes(&[seed; 32]),
            }
        }

        pub fn public_key(&self, env: &Env) -> BytesN<32> {
            BytesN::from_array(env, &self.key.verifying_key().to_bytes())
        }

        pub fn sign(&self, env: &Env, digest: &BytesN<32>) -> BytesN<64> {
            let signature = self.key.sign(&digest.to_array());
            BytesN::from_array(env, &signature.to_bytes())
        }

        pub fn proof(&self, env: &Env, digest: &BytesN<32>) -> SignerProof {
            SignerProof {
                signer: self.address.clone(),
                signature: self.sign(env, digest),
            }
        }
    }
}
