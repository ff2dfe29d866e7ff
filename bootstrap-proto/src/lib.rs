//! Bootstrap Protocol - Protobuf types for the controller's `Bootstrapper` service
//!
//! Generated from `magma.orc8r` (`bootstrapper.proto`, `certifier.proto`,
//! `identity.proto`). Only the client side is built; gateways never serve
//! this API.

/// Generated protobuf types of the `magma.orc8r` package
pub mod orc8r {
    tonic::include_proto!("magma.orc8r");
}

pub use orc8r::bootstrapper_client::BootstrapperClient;
pub use orc8r::*;

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn ecdsa_response_uses_controller_tags() {
        let response = Response {
            hw_id: None,
            challenge: vec![0xA1, 0xB2],
            response: Some(response::Response::EcdsaResponse(response::Ecdsa {
                r: vec![1],
                s: vec![2],
            })),
            csr: None,
        };

        assert_eq!(
            response.encode_to_vec(),
            vec![0x12, 0x02, 0xA1, 0xB2, 0x2A, 0x06, 0x0A, 0x01, 0x01, 0x12, 0x01, 0x02]
        );
    }

    #[test]
    fn challenge_decodes_key_type() {
        let challenge = Challenge::decode(&[0x08, 0x02, 0x12, 0x02, 0xA1, 0xB2][..]).unwrap();
        assert_eq!(challenge.key_type(), challenge_key::KeyType::SoftwareEcdsaSha256);
        assert_eq!(challenge.challenge, vec![0xA1, 0xB2]);
    }

    #[test]
    fn unknown_key_type_falls_back_to_default() {
        let challenge = Challenge {
            key_type: 42,
            challenge: vec![1],
        };
        assert_eq!(challenge.key_type(), challenge_key::KeyType::Echo);
        assert_eq!(challenge_key::KeyType::try_from(42).ok(), None);
    }

    #[test]
    fn gateway_identity_is_first_oneof_field() {
        let identity = Identity {
            value: Some(identity::Value::Gateway(identity::Gateway {
                hardware_id: "gw".to_string(),
                ..Default::default()
            })),
        };
        assert_eq!(identity.encode_to_vec(), vec![0x0A, 0x04, 0x0A, 0x02, b'g', b'w']);
    }
}
