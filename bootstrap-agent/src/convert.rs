//! Type conversions between core types and protobuf types.
//!
//! Due to Rust's orphan rules, we can't implement From traits between
//! types from different crates. Instead, we provide conversion functions.

use bootstrap_core::{
    Challenge, ChallengeResponse, ChannelError, DeviceId, KeyType, SignedCertificate,
};
use bootstrap_proto::{
    challenge_key, identity, response, AccessGatewayId, Certificate, Csr, Identity,
    Response as ProtoResponse,
};
use tonic::{Code, Status};

/// Gateway identifier sent with `GetChallenge`.
pub fn gateway_id(device_id: &DeviceId) -> AccessGatewayId {
    AccessGatewayId {
        id: device_id.as_str().to_string(),
    }
}

/// Convert a proto key type to the core key type.
pub fn key_type_from_proto(key_type: challenge_key::KeyType) -> KeyType {
    match key_type {
        challenge_key::KeyType::Echo => KeyType::Echo,
        challenge_key::KeyType::SoftwareRsaSha256 => KeyType::SoftwareRsaSha256,
        challenge_key::KeyType::SoftwareEcdsaSha256 => KeyType::SoftwareEcdsaSha256,
    }
}

/// Convert a `GetChallenge` reply.
///
/// A key type this client does not know is a controller-side refusal to
/// talk to us in any form we can answer.
pub fn challenge_from_proto(
    challenge: bootstrap_proto::Challenge,
) -> Result<Challenge, ChannelError> {
    let key_type = challenge_key::KeyType::try_from(challenge.key_type).map_err(|_| {
        ChannelError::Rejected(format!("unknown challenge key type {}", challenge.key_type))
    })?;
    Ok(Challenge::new(key_type_from_proto(key_type), challenge.challenge))
}

/// Build the `RequestSign` message.
pub fn response_to_proto(response: &ChallengeResponse) -> ProtoResponse {
    let csr = &response.csr;
    let validity = csr.validity();

    ProtoResponse {
        hw_id: Some(gateway_id(&response.device_id)),
        challenge: response.challenge.value().to_vec(),
        response: Some(response::Response::EcdsaResponse(response::Ecdsa {
            r: response.signature.r().to_vec(),
            s: response.signature.s().to_vec(),
        })),
        csr: Some(Csr {
            id: Some(Identity {
                value: Some(identity::Value::Gateway(identity::Gateway {
                    hardware_id: csr.device_id().to_string(),
                    ..Default::default()
                })),
            }),
            valid_time: Some(prost_types::Duration {
                seconds: i64::try_from(validity.as_secs()).unwrap_or(i64::MAX),
                nanos: i32::try_from(validity.subsec_nanos()).unwrap_or(0),
            }),
            csr_der: csr.der().to_vec(),
            cert_type: csr.cert_type().as_i32(),
        }),
    }
}

/// Extract the issued certificate from a `RequestSign` reply.
pub fn certificate_from_proto(certificate: Certificate) -> SignedCertificate {
    SignedCertificate::new(certificate.cert_der)
}

/// Classify a gRPC status as a controller refusal or a transport failure.
///
/// Only codes the controller itself answers with are refusals. A deadline may
/// be set by a proxy or the local transport, so it is a transport failure.
pub fn classify_status(status: Status) -> ChannelError {
    let detail = format!("{:?}: {}", status.code(), status.message());
    match status.code() {
        Code::InvalidArgument
        | Code::PermissionDenied
        | Code::Unauthenticated
        | Code::FailedPrecondition
        | Code::NotFound
        | Code::AlreadyExists => ChannelError::Rejected(detail),
        _ => ChannelError::Transport(detail),
    }
}
