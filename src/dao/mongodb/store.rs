use std::sync::Arc;

use futures::{
    FutureExt, StreamExt, TryStreamExt,
    future::BoxFuture,
    stream::{self, BoxStream},
};
use mongodb::{
    Client, ClientSession, Collection, Database, IndexModel,
    bson::{DateTime, doc},
    change_stream::event::{ChangeStreamEvent, OperationType},
    error::Error as MongoError,
    options::{FullDocumentType, IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoPlayerDocument, MongoRoomDocument, player_insert_fields, room_id, slot_fields,
    },
};
use crate::dao::{
    models::{FinishRoom, JoinRoom, NewRoom, PlayerEntity, RoomEntity, RoomStatus, Slot},
    player_store::{PlayerStore, RatingTransform},
    room_store::{RoomSnapshots, RoomStore},
    storage::{StorageError, StorageResult},
};

const ROOM_COLLECTION_NAME: &str = "battle_rooms";
const PLAYER_COLLECTION_NAME: &str = "users";

/// MongoDB backend. Change streams require a replica set deployment.
#[derive(Clone)]
pub struct MongoStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

enum Settlement {
    Applied(i64, i64),
    AlreadySettled,
    MissingPlayer(String),
}

struct SettleContext {
    rooms: Collection<MongoRoomDocument>,
    players: Collection<MongoPlayerDocument>,
    room_id: Uuid,
    first: String,
    second: String,
    transform: RatingTransform,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = establish_connection(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = establish_connection(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.rooms().await;
        let index = IndexModel::builder()
            .keys(doc! {"status": 1, "createdAt": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("room_status_created_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ROOM_COLLECTION_NAME,
                index: "status,createdAt",
                source,
            })?;

        Ok(())
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn rooms(&self) -> Collection<MongoRoomDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoRoomDocument>(ROOM_COLLECTION_NAME)
    }

    async fn players(&self) -> Collection<MongoPlayerDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoPlayerDocument>(PLAYER_COLLECTION_NAME)
    }

    async fn create_room(&self, request: NewRoom) -> MongoResult<RoomEntity> {
        let room = RoomEntity::waiting(Uuid::new_v4(), request);
        let document = MongoRoomDocument::from(&room);
        self.rooms()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::CreateRoom { id: room.id, source })?;
        debug!(room_id = %room.id, "room created");
        Ok(room)
    }

    async fn find_room(&self, id: Uuid) -> MongoResult<Option<RoomEntity>> {
        let document = self
            .rooms()
            .await
            .find_one(room_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadRoom { id, source })?;
        document.map(RoomEntity::try_from).transpose()
    }

    async fn find_oldest_waiting(&self, exclude_player: String) -> MongoResult<Option<RoomEntity>> {
        let mut cursor = self
            .rooms()
            .await
            .find(doc! {
                "status": RoomStatus::Waiting.as_str(),
                "player1_uid": { "$ne": exclude_player },
            })
            .sort(doc! {"createdAt": 1})
            .limit(1)
            .await
            .map_err(|source| MongoDaoError::QueryRooms { source })?;

        let document = cursor
            .try_next()
            .await
            .map_err(|source| MongoDaoError::QueryRooms { source })?;
        document.map(RoomEntity::try_from).transpose()
    }

    /// Explain why a guarded write on `id` matched nothing.
    async fn classify_miss(&self, id: Uuid, wanted: RoomStatus) -> StorageError {
        match self.find_room(id).await {
            Ok(None) => StorageError::room_not_found(id),
            Ok(Some(room)) => StorageError::conflict(format!(
                "room `{id}` is {} and cannot move to {}",
                room.status.as_str(),
                wanted.as_str()
            )),
            Err(err) => err.into(),
        }
    }

    async fn join_room(&self, id: Uuid, request: JoinRoom) -> StorageResult<RoomEntity> {
        let updated = self
            .rooms()
            .await
            .find_one_and_update(
                doc! {
                    "_id": id.to_string(),
                    "status": RoomStatus::Waiting.as_str(),
                    "player2_uid": null,
                },
                doc! {
                    "$set": {
                        "status": RoomStatus::Ongoing.as_str(),
                        "player2_uid": request.player2_id,
                        "player2_displayName": request.player2_name,
                        "startTime": DateTime::from_system_time(request.start_time),
                    }
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::UpdateRoom { id, source })?;

        match updated {
            Some(document) => Ok(RoomEntity::try_from(document)?),
            None => Err(self.classify_miss(id, RoomStatus::Ongoing).await),
        }
    }

    async fn cancel_room(&self, id: Uuid, player1_id: String) -> StorageResult<RoomEntity> {
        let updated = self
            .rooms()
            .await
            .find_one_and_update(
                doc! {
                    "_id": id.to_string(),
                    "status": RoomStatus::Waiting.as_str(),
                    "player1_uid": player1_id,
                },
                doc! { "$set": { "status": RoomStatus::Canceled.as_str() } },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::UpdateRoom { id, source })?;

        match updated {
            Some(document) => Ok(RoomEntity::try_from(document)?),
            None => Err(self.classify_miss(id, RoomStatus::Canceled).await),
        }
    }

    async fn record_submission(
        &self,
        id: Uuid,
        slot: Slot,
        score: i64,
        code: String,
    ) -> StorageResult<()> {
        let (score_field, code_field) = slot_fields(slot);
        let result = self
            .rooms()
            .await
            .update_one(
                doc! { "_id": id.to_string(), "status": RoomStatus::Ongoing.as_str() },
                doc! { "$set": { score_field: score, code_field: code } },
            )
            .await
            .map_err(|source| MongoDaoError::UpdateRoom { id, source })?;

        if result.matched_count == 0 {
            return Err(self.classify_miss(id, RoomStatus::Ongoing).await);
        }
        Ok(())
    }

    async fn finish_room(&self, id: Uuid, finish: FinishRoom) -> StorageResult<bool> {
        let (first_score, second_score) = finish.expected_scores;
        let updated = self
            .rooms()
            .await
            .find_one_and_update(
                doc! {
                    "_id": id.to_string(),
                    "status": RoomStatus::Ongoing.as_str(),
                    "player1_score": first_score,
                    "player2_score": second_score,
                },
                doc! {
                    "$set": {
                        "status": RoomStatus::Finished.as_str(),
                        "endTime": DateTime::from_system_time(finish.end_time),
                        "winner_uid": finish.winner_id,
                        "ratingsSettled": finish.ratings_settled,
                    }
                },
            )
            .await
            .map_err(|source| MongoDaoError::UpdateRoom { id, source })?;

        if updated.is_some() {
            return Ok(true);
        }

        match self.find_room(id).await? {
            None => Err(StorageError::room_not_found(id)),
            Some(room) if room.status == RoomStatus::Finished => Ok(false),
            Some(room) if room.status == RoomStatus::Ongoing => Err(StorageError::conflict(
                format!("scores of room `{id}` changed since they were read"),
            )),
            Some(room) => Err(StorageError::InvalidTransition {
                from: room.status,
                to: RoomStatus::Finished,
            }),
        }
    }

    async fn watch_room(&self, id: Uuid) -> MongoResult<RoomSnapshots> {
        let collection = self.rooms().await;
        // Open the stream before reading so no change slips between the two.
        let changes = collection
            .watch()
            .pipeline(vec![doc! { "$match": { "documentKey._id": id.to_string() } }])
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|source| MongoDaoError::WatchRoom { id, source })?;

        let initial = self.find_room(id).await?;

        let changes: BoxStream<'static, StorageResult<Option<RoomEntity>>> = changes
            .map(move |event| match event {
                Ok(event) => snapshot_from_event(id, event),
                Err(source) => Err(MongoDaoError::WatchRoom { id, source }.into()),
            })
            .boxed();

        Ok(stream::once(async move { Ok(initial) })
            .chain(changes)
            .boxed())
    }

    async fn find_player(&self, id: String) -> MongoResult<Option<PlayerEntity>> {
        let document = self
            .players()
            .await
            .find_one(doc! {"_id": id.as_str()})
            .await
            .map_err(|source| MongoDaoError::LoadPlayer { id, source })?;
        Ok(document.map(PlayerEntity::from))
    }

    async fn create_player_if_absent(&self, player: PlayerEntity) -> StorageResult<PlayerEntity> {
        let id = player.id.clone();
        self.players()
            .await
            .update_one(
                doc! {"_id": id.as_str()},
                doc! {"$setOnInsert": player_insert_fields(&player)},
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SavePlayer {
                id: id.clone(),
                source,
            })?;

        self.find_player(id.clone())
            .await?
            .ok_or_else(|| StorageError::player_not_found(&id))
    }

    async fn settle_ratings(
        &self,
        room_id: Uuid,
        first: String,
        second: String,
        transform: RatingTransform,
    ) -> StorageResult<Option<(i64, i64)>> {
        let client = self.client().await;
        let context = SettleContext {
            rooms: self.rooms().await,
            players: self.players().await,
            room_id,
            first,
            second,
            transform,
        };
        let mut session = client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::RatingTransaction { source })?;

        // and_run aborts a failed attempt before retrying transient errors and
        // retries commits whose result is unknown.
        let settlement = session
            .start_transaction()
            .and_run(context, |session, context| {
                settle_in_transaction(session, context).boxed()
            })
            .await
            .map_err(|source| MongoDaoError::RatingTransaction { source })?;

        match settlement {
            Settlement::Applied(first, second) => Ok(Some((first, second))),
            Settlement::AlreadySettled => {
                debug!(room_id = %room_id, "ratings already settled");
                Ok(None)
            }
            Settlement::MissingPlayer(id) => Err(StorageError::player_not_found(&id)),
        }
    }
}

fn snapshot_from_event(
    id: Uuid,
    event: ChangeStreamEvent<MongoRoomDocument>,
) -> StorageResult<Option<RoomEntity>> {
    match event.operation_type {
        OperationType::Delete
        | OperationType::Drop
        | OperationType::DropDatabase
        | OperationType::Invalidate => Ok(None),
        _ => match event.full_document {
            Some(document) => Ok(Some(RoomEntity::try_from(document)?)),
            // Update lookup found nothing: the room was deleted in the meantime.
            None => {
                debug!(room_id = %id, "change event without document");
                Ok(None)
            }
        },
    }
}

async fn settle_in_transaction(
    session: &mut ClientSession,
    context: &mut SettleContext,
) -> Result<Settlement, MongoError> {
    let Some(first) = context
        .players
        .find_one(doc! {"_id": context.first.as_str()})
        .session(&mut *session)
        .await?
    else {
        return Ok(Settlement::MissingPlayer(context.first.clone()));
    };
    let Some(second) = context
        .players
        .find_one(doc! {"_id": context.second.as_str()})
        .session(&mut *session)
        .await?
    else {
        return Ok(Settlement::MissingPlayer(context.second.clone()));
    };

    let marked = context
        .rooms
        .update_one(
            doc! {
                "_id": context.room_id.to_string(),
                "status": RoomStatus::Finished.as_str(),
                "ratingsSettled": { "$ne": true },
            },
            doc! { "$set": { "ratingsSettled": true } },
        )
        .session(&mut *session)
        .await?;
    if marked.matched_count == 0 {
        return Ok(Settlement::AlreadySettled);
    }

    let (first_next, second_next) = (context.transform)(
        PlayerEntity::from(first).rating_or_default(),
        PlayerEntity::from(second).rating_or_default(),
    );
    context
        .players
        .update_one(
            doc! {"_id": context.first.as_str()},
            doc! {"$set": {"rating": first_next}},
        )
        .session(&mut *session)
        .await?;
    context
        .players
        .update_one(
            doc! {"_id": context.second.as_str()},
            doc! {"$set": {"rating": second_next}},
        )
        .session(&mut *session)
        .await?;

    Ok(Settlement::Applied(first_next, second_next))
}

impl RoomStore for MongoStore {
    fn create_room(&self, room: NewRoom) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_room(room).await.map_err(Into::into) })
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_room(id).await.map_err(Into::into) })
    }

    fn find_oldest_waiting(
        &self,
        exclude_player: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_oldest_waiting(exclude_player)
                .await
                .map_err(Into::into)
        })
    }

    fn join_room(&self, id: Uuid, join: JoinRoom) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move { store.join_room(id, join).await })
    }

    fn cancel_room(
        &self,
        id: Uuid,
        player1_id: String,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move { store.cancel_room(id, player1_id).await })
    }

    fn record_submission(
        &self,
        id: Uuid,
        slot: Slot,
        score: i64,
        code: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.record_submission(id, slot, score, code).await })
    }

    fn finish_room(&self, id: Uuid, finish: FinishRoom) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.finish_room(id, finish).await })
    }

    fn watch_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<RoomSnapshots>> {
        let store = self.clone();
        Box::pin(async move { store.watch_room(id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}

impl PlayerStore for MongoStore {
    fn find_player(&self, id: String) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_player(id).await.map_err(Into::into) })
    }

    fn create_player_if_absent(
        &self,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_player_if_absent(player).await })
    }

    fn settle_ratings(
        &self,
        room_id: Uuid,
        first: String,
        second: String,
        transform: RatingTransform,
    ) -> BoxFuture<'static, StorageResult<Option<(i64, i64)>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .settle_ratings(room_id, first, second, transform)
                .await
        })
    }
}
