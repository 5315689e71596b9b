use super::*;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn ser<T: Serialize>(x: &T) -> Result<Vec<u8>> {
    let bin = bincode::serialize(x)?;
    Ok(bin)
}

pub fn desr<T: DeserializeOwned>(bin: &[u8]) -> Result<T> {
    let x = bincode::deserialize(bin)?;
    Ok(x)
}
