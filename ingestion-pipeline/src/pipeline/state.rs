use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Loaded, Chunked, Embedded, Indexed, Published, Failed],
    events {
        load { transition: { from: Ready, to: Loaded } }
        chunk { transition: { from: Loaded, to: Chunked } }
        embed { transition: { from: Chunked, to: Embedded } }
        index { transition: { from: Embedded, to: Indexed } }
        publish { transition: { from: Indexed, to: Published } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Loaded, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: Indexed, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
