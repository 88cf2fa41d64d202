//! The three restart-safe builder files, each independently loadable and
//! written via temp-file-then-rename. Missing files are not errors;
//! malformed ones are — the caller treats that as fatal corruption.

use std::path::{Path, PathBuf};

use post::Post;
use serde::{Deserialize, Serialize};

use crate::nipost::NipostBuildState;
use crate::types::NipostChallenge;
use crate::Error;

pub struct BuilderStore {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct PersistedPost {
    post: Post,
}

impl BuilderStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn load_initial_post(&self) -> Result<Option<Post>, Error> {
        let loaded: Option<PersistedPost> = common::load_optional(&self.path("post.bin"))?;
        Ok(loaded.map(|p| p.post))
    }

    pub fn save_initial_post(&self, post: &Post) -> Result<(), Error> {
        self.write("post.bin", &PersistedPost { post: post.clone() })
    }

    pub fn load_challenge(&self) -> Result<Option<NipostChallenge>, Error> {
        common::load_optional(&self.path("nipost_challenge.bin")).map_err(Error::from)
    }

    pub fn save_challenge(&self, challenge: &NipostChallenge) -> Result<(), Error> {
        self.write("nipost_challenge.bin", challenge)
    }

    pub fn discard_challenge(&self) -> Result<(), Error> {
        remove_if_present(&self.path("nipost_challenge.bin"))
    }

    pub fn load_nipost_state(&self) -> Result<Option<NipostBuildState>, Error> {
        common::load_optional(&self.path("nipost_state.bin")).map_err(Error::from)
    }

    pub fn save_nipost_state(&self, state: &NipostBuildState) -> Result<(), Error> {
        self.write("nipost_state.bin", state)
    }

    pub fn discard_nipost_state(&self) -> Result<(), Error> {
        remove_if_present(&self.path("nipost_state.bin"))
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), Error> {
        let bytes = common::codec::encode(value)?;
        common::write_atomic(&self.path(name), &bytes).map_err(Error::from)
    }
}

fn remove_if_present(path: &Path) -> Result<(), Error> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Other(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{AtxId, Epoch};

    fn sample_challenge() -> NipostChallenge {
        NipostChallenge {
            publish_epoch: Epoch::new(1),
            positioning_atx: AtxId::zero(),
            kind: crate::types::ChallengeKind::Subsequent {
                prev_atx_id: AtxId::zero(),
                sequence: 5,
            },
        }
    }

    #[test]
    fn challenge_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = BuilderStore::new(dir.path());
        assert!(store.load_challenge().unwrap().is_none());

        let challenge = sample_challenge();
        store.save_challenge(&challenge).unwrap();
        let loaded = store.load_challenge().unwrap().unwrap();
        assert_eq!(loaded, challenge);

        store.discard_challenge().unwrap();
        assert!(store.load_challenge().unwrap().is_none());
    }

    #[test]
    fn discard_on_absent_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = BuilderStore::new(dir.path());
        store.discard_challenge().unwrap();
        store.discard_nipost_state().unwrap();
    }
}
