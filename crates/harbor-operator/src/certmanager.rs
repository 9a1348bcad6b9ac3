//! cert-manager resources used for internal TLS
//!
//! Only the fields the operator writes or reads are modelled; everything
//! else is left to cert-manager defaults.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to the issuer of a certificate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl IssuerRef {
    /// Reference to a namespaced Issuer
    pub fn issuer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some("Issuer".to_string()),
            group: Some("cert-manager.io".to_string()),
        }
    }
}

/// Private key settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i32>,
}

/// cert-manager Certificate
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    pub secret_name: String,
    pub issuer_ref: IssuerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
    #[serde(rename = "isCA", default, skip_serializing_if = "Option::is_none")]
    pub is_ca: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PrivateKey>,
}

/// CA issuer backed by a secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    pub secret_name: String,
}

/// Marker for self-signed issuers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SelfSignedIssuer {}

/// cert-manager Issuer
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "cert-manager.io", version = "v1", kind = "Issuer", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaIssuer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedIssuer>,
}

impl IssuerSpec {
    pub fn self_signed() -> Self {
        Self {
            ca: None,
            self_signed: Some(SelfSignedIssuer {}),
        }
    }

    pub fn ca(secret_name: impl Into<String>) -> Self {
        Self {
            ca: Some(CaIssuer {
                secret_name: secret_name.into(),
            }),
            self_signed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_certificate_serialization() {
        let cert = Certificate::new(
            "harbor-core-internal",
            CertificateSpec {
                secret_name: "harbor-core-internal".into(),
                issuer_ref: IssuerRef::issuer("harbor-ca"),
                dns_names: vec!["harbor-core".into()],
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&cert).unwrap();
        assert_eq!(json["apiVersion"], "cert-manager.io/v1");
        assert_eq!(json["spec"]["issuerRef"]["kind"], "Issuer");
        assert!(json["spec"].get("isCA").is_none());
        assert_eq!(Certificate::kind(&()), "Certificate");
    }

    #[test]
    fn test_issuer_variants() {
        let json = serde_json::to_value(IssuerSpec::self_signed()).unwrap();
        assert!(json.get("selfSigned").is_some());
        let json = serde_json::to_value(IssuerSpec::ca("ca-secret")).unwrap();
        assert_eq!(json["ca"]["secretName"], "ca-secret");
    }
}
