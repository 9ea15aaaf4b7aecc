use devnet::applications::Capture;
use devnet_core::{
    Address, Connection, Context, NetworkConfig, NetworkId, NetworkService, Packet, Payload,
    ReceiveError, Registration, RegistryError,
};
use std::sync::Arc;

const NET: NetworkId = NetworkId::new(1);

fn service() -> NetworkService {
    NetworkService::new(NetworkConfig::new().rng_seed(2024))
}

/// A on frequency 5 and B on frequency 5 with receive-all set.
fn pair(service: &NetworkService) -> anyhow::Result<(Connection, Arc<Capture>, Connection, Arc<Capture>)> {
    let a_inbox = Capture::new_shared();
    let b_inbox = Capture::new_shared();
    let a = service.register(
        Registration::shared(NET, a_inbox.clone())
            .address("A")
            .frequency(5),
    )?;
    let b = service.register(
        Registration::shared(NET, b_inbox.clone())
            .address("B")
            .frequency(5)
            .receive_all(true),
    )?;
    Ok((a, a_inbox, b, b_inbox))
}

#[test]
fn unicast_to_missing_target_reaches_receive_all_devices() -> anyhow::Result<()> {
    let service = service();
    let (a, a_inbox, _b, b_inbox) = pair(&service)?;

    a.send_on(5, "C", Payload::command("hello"))?;
    let report = service.drain();

    assert_eq!(report.deliveries, 1);
    assert_eq!(b_inbox.count(), 1);
    assert_eq!(b_inbox.packets()[0].target().map(|t| t.as_str()), Some("C"));
    assert_eq!(a_inbox.count(), 0);
    Ok(())
}

#[test]
fn broadcast_skips_the_sender() -> anyhow::Result<()> {
    let service = service();
    let (a, a_inbox, _b, b_inbox) = pair(&service)?;

    a.broadcast(Payload::command("hello"))?;
    service.drain();

    assert_eq!(b_inbox.count(), 1);
    assert_eq!(a_inbox.count(), 0);
    Ok(())
}

#[test]
fn duplicate_custom_address_is_rejected() -> anyhow::Result<()> {
    let service = service();
    let _alpha = service.register(Registration::new(NET, Capture::new()).address("ALPHA"))?;

    let err = service
        .register(Registration::new(NET, Capture::new()).address("ALPHA"))
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::AddressTaken {
            network: NET,
            address: "ALPHA".into()
        }
    );
    assert_eq!(service.network_size(NET), 1);
    assert!(service.device(NET, "ALPHA").is_some_and(|info| info.custom_address));
    Ok(())
}

#[test]
fn drain_budget_carries_the_rest_over() -> anyhow::Result<()> {
    let service = service();
    let (_a, _, _b, b_inbox) = pair(&service)?;
    for n in 0..35u64 {
        service.send(Packet::broadcast(NET, 5, "A", Payload::new().with("n", n)))?;
    }

    let numbers = |inbox: &Capture| -> Vec<u64> {
        inbox
            .packets()
            .iter()
            .map(|packet| packet.payload().get("n").and_then(|n| n.ok_uint()).unwrap())
            .collect()
    };

    assert_eq!(service.drain_budget(30).packets, 30);
    assert_eq!(numbers(&b_inbox), (0..30).collect::<Vec<_>>());
    assert_eq!(service.pending(), 5);

    assert_eq!(service.drain_budget(30).packets, 5);
    assert_eq!(numbers(&b_inbox), (0..35).collect::<Vec<_>>());
    assert_eq!(service.pending(), 0);
    Ok(())
}

#[test]
fn frequency_change_moves_both_indices() -> anyhow::Result<()> {
    let service = service();
    let d = service.register(
        Registration::new(NET, Capture::new())
            .address("D")
            .frequency(5)
            .receive_all(true),
    )?;

    d.set_receive_frequency(Some(7))?;

    assert!(service.listeners(NET, 5).is_empty());
    assert!(service.receive_all_listeners(NET, 5).is_empty());
    assert_eq!(service.listeners(NET, 7), vec![Address::from("D")]);
    assert_eq!(service.receive_all_listeners(NET, 7), vec![Address::from("D")]);
    Ok(())
}

#[test]
fn networks_are_isolated() -> anyhow::Result<()> {
    let service = service();
    let wired = Capture::new_shared();
    let wireless = Capture::new_shared();
    let sender = service.register(Registration::new(NetworkId::WIRED, Capture::new()).frequency(0))?;
    let _wired = service.register(Registration::shared(NetworkId::WIRED, wired.clone()).frequency(0))?;
    let _wireless = service.register(
        Registration::shared(NetworkId::WIRELESS, wireless.clone())
            .frequency(0)
            .receive_all(true),
    )?;

    sender.broadcast(Payload::command("hello"))?;
    service.drain();
    assert_eq!(wired.count(), 1);
    assert_eq!(wireless.count(), 0);
    Ok(())
}

#[test]
fn same_address_on_different_networks() -> anyhow::Result<()> {
    let service = service();
    let _a = service.register(Registration::new(NetworkId::WIRED, Capture::new()).address("HUB"))?;
    let _b = service.register(Registration::new(NetworkId::WIRELESS, Capture::new()).address("HUB"))?;
    assert!(service.is_address_present(NetworkId::WIRED, "HUB"));
    assert!(service.is_address_present(NetworkId::WIRELESS, "HUB"));
    Ok(())
}

#[test]
#[ntest::timeout(5000)]
fn endless_echo_advances_one_hop_per_tick() {
    let service = service();
    let echo = |packet: &Packet, context: &Context| -> Result<(), ReceiveError> {
        context.reply(packet, packet.payload().clone())?;
        Ok(())
    };
    let a = service
        .register(Registration::new(NET, echo).address("A").frequency(9))
        .unwrap();
    let _b = service
        .register(Registration::new(NET, echo).address("B").frequency(9))
        .unwrap();

    a.send("B", Payload::command("ping")).unwrap();
    for _ in 0..100 {
        let report = service.drain();
        assert_eq!(report.packets, 1);
        assert_eq!(report.deliveries, 1);
        assert_eq!(report.remaining, 1);
    }
}
