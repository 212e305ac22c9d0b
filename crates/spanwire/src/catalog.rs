//! # Message Catalog
//!
//! The closed set of messages that may cross the renderer <-> platform
//! boundary, each with a fixed argument tuple and a fixed reply type.
//!
//! ## Invariants
//!
//! - **Single source of truth**: the [`catalog!`] invocation below is the
//!   only place a message kind is ever added. It generates both the [`Kind`]
//!   enum and a marker type per message, so the two can never drift apart.
//! - **Bounded arity**: [`ArgTuple`] is sealed and implemented for tuples of
//!   zero to four elements. Declaring a five-argument message does not
//!   compile.
//! - **Untrusted wire**: arity and element types are re-checked when decoding
//!   an argument list, because the other side of the boundary is not trusted
//!   to have been built against the same catalog.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;
use crate::payload::BiometricAvailability;
use crate::payload::LocalNotification;
use crate::payload::PrivateKeyData;
use crate::payload::PublicKeyData;
use crate::payload::SettingsData;

/// A statically typed message: its kind, argument tuple, and reply type.
///
/// Implemented by the zero-sized marker types the catalog generates. Call
/// sites name the marker (`bridge.invoke::<GetKeyIDs>(()).await`) and the
/// compiler holds argument and reply shapes to the catalog declaration.
pub trait Method: 'static {
    const KIND: Kind;
    type Args: ArgTuple;
    type Reply: Serialize + DeserializeOwned + Send + 'static;
}

mod sealed {
    pub trait Sealed {}
}

/// An argument tuple of bounded arity, convertible to and from the wire's
/// JSON argument array.
pub trait ArgTuple: sealed::Sealed + Sized + Send + 'static {
    const ARITY: usize;

    /// Encode the tuple as the `args` array of a call envelope.
    fn into_values(self) -> Result<Vec<Value>>;

    /// Decode an inbound `args` array, checking arity and element types.
    /// `kind` is carried for error context only.
    fn from_values(kind: Kind, values: Vec<Value>) -> Result<Self>;
}

fn check_arity(kind: Kind, expected: usize, values: &[Value]) -> Result<()> {
    if values.len() != expected {
        return Err(Error::ArityMismatch { kind, expected, got: values.len() });
    }
    Ok(())
}

fn decode_arg<T: DeserializeOwned>(kind: Kind, index: usize, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::ArgumentDecode {
        kind,
        index,
        detail: e.to_string(),
    })
}

impl sealed::Sealed for () {}

impl ArgTuple for () {
    const ARITY: usize = 0;

    fn into_values(self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    fn from_values(kind: Kind, values: Vec<Value>) -> Result<Self> {
        check_arity(kind, 0, &values)?;
        Ok(())
    }
}

impl<A> sealed::Sealed for (A,) where A: Serialize + DeserializeOwned + Send + 'static {}

impl<A> ArgTuple for (A,)
where
    A: Serialize + DeserializeOwned + Send + 'static,
{
    const ARITY: usize = 1;

    fn into_values(self) -> Result<Vec<Value>> {
        Ok(vec![serde_json::to_value(self.0)?])
    }

    fn from_values(kind: Kind, values: Vec<Value>) -> Result<Self> {
        check_arity(kind, 1, &values)?;
        let mut it = values.into_iter();
        Ok((decode_arg(kind, 0, it.next().unwrap())?,))
    }
}

impl<A, B> sealed::Sealed for (A, B)
where
    A: Serialize + DeserializeOwned + Send + 'static,
    B: Serialize + DeserializeOwned + Send + 'static,
{
}

impl<A, B> ArgTuple for (A, B)
where
    A: Serialize + DeserializeOwned + Send + 'static,
    B: Serialize + DeserializeOwned + Send + 'static,
{
    const ARITY: usize = 2;

    fn into_values(self) -> Result<Vec<Value>> {
        Ok(vec![serde_json::to_value(self.0)?, serde_json::to_value(self.1)?])
    }

    fn from_values(kind: Kind, values: Vec<Value>) -> Result<Self> {
        check_arity(kind, 2, &values)?;
        let mut it = values.into_iter();
        Ok((
            decode_arg(kind, 0, it.next().unwrap())?,
            decode_arg(kind, 1, it.next().unwrap())?,
        ))
    }
}

impl<A, B, C> sealed::Sealed for (A, B, C)
where
    A: Serialize + DeserializeOwned + Send + 'static,
    B: Serialize + DeserializeOwned + Send + 'static,
    C: Serialize + DeserializeOwned + Send + 'static,
{
}

impl<A, B, C> ArgTuple for (A, B, C)
where
    A: Serialize + DeserializeOwned + Send + 'static,
    B: Serialize + DeserializeOwned + Send + 'static,
    C: Serialize + DeserializeOwned + Send + 'static,
{
    const ARITY: usize = 3;

    fn into_values(self) -> Result<Vec<Value>> {
        Ok(vec![
            serde_json::to_value(self.0)?,
            serde_json::to_value(self.1)?,
            serde_json::to_value(self.2)?,
        ])
    }

    fn from_values(kind: Kind, values: Vec<Value>) -> Result<Self> {
        check_arity(kind, 3, &values)?;
        let mut it = values.into_iter();
        Ok((
            decode_arg(kind, 0, it.next().unwrap())?,
            decode_arg(kind, 1, it.next().unwrap())?,
            decode_arg(kind, 2, it.next().unwrap())?,
        ))
    }
}

impl<A, B, C, D> sealed::Sealed for (A, B, C, D)
where
    A: Serialize + DeserializeOwned + Send + 'static,
    B: Serialize + DeserializeOwned + Send + 'static,
    C: Serialize + DeserializeOwned + Send + 'static,
    D: Serialize + DeserializeOwned + Send + 'static,
{
}

impl<A, B, C, D> ArgTuple for (A, B, C, D)
where
    A: Serialize + DeserializeOwned + Send + 'static,
    B: Serialize + DeserializeOwned + Send + 'static,
    C: Serialize + DeserializeOwned + Send + 'static,
    D: Serialize + DeserializeOwned + Send + 'static,
{
    const ARITY: usize = 4;

    fn into_values(self) -> Result<Vec<Value>> {
        Ok(vec![
            serde_json::to_value(self.0)?,
            serde_json::to_value(self.1)?,
            serde_json::to_value(self.2)?,
            serde_json::to_value(self.3)?,
        ])
    }

    fn from_values(kind: Kind, values: Vec<Value>) -> Result<Self> {
        check_arity(kind, 4, &values)?;
        let mut it = values.into_iter();
        Ok((
            decode_arg(kind, 0, it.next().unwrap())?,
            decode_arg(kind, 1, it.next().unwrap())?,
            decode_arg(kind, 2, it.next().unwrap())?,
            decode_arg(kind, 3, it.next().unwrap())?,
        ))
    }
}

/// Declares the catalog: one `Kind` variant and one marker type per message.
macro_rules! catalog {
    ($(
        $(#[$meta:meta])*
        $name:ident ( $($arg:ty),* ) -> $reply:ty ;
    )*) => {
        /// A member of the message catalog. Serialized by its exact variant
        /// name, which is the wire name shared with the other side.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        pub enum Kind {
            $($name,)*
        }

        impl Kind {
            /// The wire name of this kind.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Kind::$name => stringify!($name),)*
                }
            }
        }

        impl std::fmt::Display for Kind {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        $(
            $(#[$meta])*
            pub struct $name;

            impl Method for $name {
                const KIND: Kind = Kind::$name;
                type Args = ($($arg,)*);
                type Reply = $reply;
            }
        )*
    };
}

catalog! {
    /// Put a string on the system clipboard.
    CopyToClipboard(String) -> ();

    /// Open the camera and resolve with the decoded QR content.
    ScanQRCode() -> String;

    ShowSplashScreen() -> ();
    HideSplashScreen() -> ();

    /// Whether the device offers biometric auth and has it enrolled.
    BioAuthAvailable() -> BiometricAvailability;
    /// Run a biometric prompt; resolves with an error message on refusal.
    TestBioAuth() -> Option<String>;

    // Reply path is spelled out: the marker struct shares the enum's name.
    NotificationPermission() -> crate::payload::NotificationPermission;
    RequestNotificationPermission() -> bool;
    ShowNotification(LocalNotification) -> ();

    /// Open a URL in the system browser.
    OpenLink(String) -> ();

    /// The deep link the app was launched or foregrounded with. Also pushed
    /// as a subscription event whenever a new deep link arrives.
    DeepLinkURL() -> String;

    CheckUpdateAvailability() -> bool;
    StartUpdate() -> ();

    /// Settings are partial on the wire: absent fields are left unchanged.
    ReadSettings() -> SettingsData;
    StoreSettings(SettingsData) -> bool;
    ReadIgnoredSignatureRequestHashes() -> Vec<String>;
    StoreIgnoredSignatureRequestHashes(Vec<String>) -> bool;

    GetKeyIDs() -> Vec<String>;
    GetPublicKeyData(String) -> PublicKeyData;
    /// (key_id, password)
    GetPrivateKeyData(String, String) -> PrivateKeyData;
    /// (key_id, password, private_data, public_data)
    SaveKey(String, String, PrivateKeyData, Option<PublicKeyData>) -> ();
    SavePublicKeyData(String, PublicKeyData) -> ();
    /// (internal_account_id, transaction_xdr, password); resolves with the
    /// signed transaction envelope.
    SignTransaction(String, String, String) -> String;
    RemoveKey(String) -> ();
}
